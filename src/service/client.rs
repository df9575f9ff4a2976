use crate::config::NetworkConfig;
use crate::error::Result;
use crate::protocol::handshake::Negotiation;
use crate::protocol::validator::{Role, Validator};
use crate::protocol::Connection;
use crate::transport::tcp;
use bytes::Bytes;
use tracing::{debug, instrument};

/// Validated TCP client connection.
///
/// Opens the socket within `client.connection_timeout`, then negotiates as
/// [`Role::Initiator`] within `negotiation.timeout`.
#[derive(Debug, Clone)]
pub struct Client {
    connection: Connection,
}

impl Client {
    /// Connect to `config.client.address`.
    #[instrument(skip(config, validator), fields(address = %config.client.address))]
    pub async fn connect<V: Validator>(config: &NetworkConfig, validator: V) -> Result<Self> {
        Self::connect_to(&config.client.address, config, validator).await
    }

    /// Connect to an explicit address using the remaining settings from `config`.
    #[instrument(skip(config, validator))]
    pub async fn connect_to<V: Validator>(
        addr: &str,
        config: &NetworkConfig,
        validator: V,
    ) -> Result<Self> {
        let raw = tcp::connect(addr, &config.connection, config.client.connection_timeout).await?;
        debug!(connection = raw.id(), "Raw connection open, negotiating");

        let connection = Negotiation::new(Role::Initiator, validator)
            .with_timeout(config.negotiation.timeout)
            .run(raw)
            .await?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn into_connection(self) -> Connection {
        self.connection
    }

    pub fn write(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.connection.write(payload)
    }

    pub fn close(&self) {
        self.connection.close();
    }
}
