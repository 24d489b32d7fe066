use crate::error::TunnelErr;

/// Immutable description of one requested tunnel.
///
/// Ports are carried as strings because that is how they travel to the SSM
/// document parameters; `validate` checks they are well-formed port numbers.
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    pub target: String,
    pub host: String,
    pub local_port: String,
    pub remote_port: String,
    pub region: String,
    pub command: Option<String>,
}

impl TunnelRequest {
    pub fn validate(&self) -> Result<(), TunnelErr> {
        for (name, value) in [
            ("target", &self.target),
            ("host", &self.host),
            ("local-port", &self.local_port),
            ("remote-port", &self.remote_port),
            ("region", &self.region),
        ] {
            if value.trim().is_empty() {
                return Err(TunnelErr::InvalidRequest {
                    reason: format!("{name} must not be empty"),
                });
            }
        }

        for (name, value) in [
            ("local-port", &self.local_port),
            ("remote-port", &self.remote_port),
        ] {
            if value.parse::<u16>().is_err() {
                return Err(TunnelErr::InvalidRequest {
                    reason: format!("{name} is not a valid port number: {value}"),
                });
            }
        }

        Ok(())
    }
}
