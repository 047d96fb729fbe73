//! Protocol to transport mapping

use std::sync::Arc;

use filebridge_core::domain::{Endpoint, Protocol, TransferError};
use filebridge_core::ports::{ITransport, ITransportFactory};

use crate::ftp::FtpTransport;
use crate::local::LocalCopyTransport;
use crate::secret::{SecretScrambler, XorDeflateScrambler};
use crate::sftp::SftpTransport;

/// Builds the transport matching `Endpoint::protocol`
#[derive(Clone)]
pub struct ProtocolTransportFactory {
    scrambler: Arc<dyn SecretScrambler>,
}

impl ProtocolTransportFactory {
    /// Factory restoring SFTP keys with `scrambler`
    pub fn new(scrambler: Arc<dyn SecretScrambler>) -> Self {
        Self { scrambler }
    }
}

impl Default for ProtocolTransportFactory {
    fn default() -> Self {
        Self::new(Arc::new(XorDeflateScrambler::default()))
    }
}

impl ITransportFactory for ProtocolTransportFactory {
    fn create(&self, endpoint: &Endpoint) -> Result<Box<dyn ITransport>, TransferError> {
        let transport: Box<dyn ITransport> = match endpoint.protocol {
            Protocol::PlainFtp => Box::new(FtpTransport::plain(endpoint)?),
            Protocol::TlsFtp => Box::new(FtpTransport::secure(endpoint)?),
            Protocol::Sftp => Box::new(SftpTransport::new(endpoint, Arc::clone(&self.scrambler))?),
            Protocol::LocalCopy => Box::new(LocalCopyTransport::new(endpoint)),
        };
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use filebridge_core::domain::{Credentials, EndpointId, InstanceId};

    use super::*;

    #[test]
    fn test_factory_maps_every_protocol() {
        let factory = ProtocolTransportFactory::default();
        for protocol in [
            Protocol::PlainFtp,
            Protocol::TlsFtp,
            Protocol::Sftp,
            Protocol::LocalCopy,
        ] {
            let endpoint = Endpoint::new(
                EndpointId::new(1),
                InstanceId::new(1),
                protocol,
                "host.example.com",
                "/data",
                "/tmp/data",
            )
            .with_credentials(Credentials::password("user", "secret"));
            let transport = factory.create(&endpoint).unwrap();
            assert_eq!(transport.protocol(), protocol);
        }
    }
}
