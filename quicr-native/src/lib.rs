//! Native QUIC/TLS binding for [`quicr_core`]: endpoint setup (`quic`),
//! certificate loading (`tls`), and the `StreamTransport`/`DatagramTransport`
//! adapters (`transport`) that let the transport-agnostic core run over
//! `quinn`.

pub mod quic;
pub mod tls;
pub mod transport;
