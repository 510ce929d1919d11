use crate::error::Result;
use crate::signaling::types::*;

/// The external signaling authority.
///
/// Every method is a synchronous round trip: it returns only after the
/// authority has answered. Methods are called on the engine's signaling
/// thread, so an implementation must never call back into the bridge
/// synchronously from inside one of them.
pub trait Signaller: Send + Sync {
    /// Router RTP capabilities.
    fn server_capabilities(&self) -> Result<RtpCapabilities>;

    /// Create a remote WebRTC transport and return its parameters.
    fn create_transport(&self) -> Result<TransportOptions>;

    /// Local RTP capabilities after the device has loaded.
    fn on_capabilities(&self, capabilities: &RtpCapabilities) -> Result<()>;

    /// Connect intent for a transport, carrying the local DTLS parameters.
    fn on_connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &DtlsParameters,
    ) -> Result<()>;

    /// Register a producer and return the id the authority assigned.
    fn on_produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<ProducerId>;

    /// Register a data producer and return the id the authority assigned.
    fn on_produce_data(
        &self,
        transport_id: &TransportId,
        sctp_stream_parameters: &SctpStreamParameters,
        label: &str,
        protocol: &str,
    ) -> Result<DataProducerId>;

    /// Ask the authority for a data consumer of `data_producer_id`.
    fn consume_data(
        &self,
        transport_id: &TransportId,
        data_producer_id: &DataProducerId,
    ) -> Result<DataConsumerOptions>;

    fn on_connection_state(&self, transport_id: &TransportId, state: &str);

    fn on_data_message(&self, data_consumer_id: &DataConsumerId, data: &[u8]);

    fn on_data_consumer_state(&self, data_consumer_id: &DataConsumerId, state: DataChannelState);

    fn on_data_producer_state(&self, data_producer_id: &DataProducerId, state: DataChannelState);
}
