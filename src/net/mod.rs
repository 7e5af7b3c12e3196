//! Raw network layer: the [Transport] seam, the TUN device, and the dispatch
//! event loop.

mod transport;
pub use transport::Transport;

pub mod tun;
pub use tun::Tun;

mod interface;
pub use interface::{InboundSegment, TunTransport};

pub mod event_loop;
pub use event_loop::{Handle, run};
