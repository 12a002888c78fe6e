//! UDP sync layer for the twincam pair.
//!
//! One configurable datagram port carries three exchanges: the clock-probe
//! echo (bare decimal monotonic microseconds), the `READY`/`OK`/`NO` arm
//! query, and the `START <delay>`/`ACK` capture trigger. The master side
//! lives in [probe] and [control]; the slave side in [server]. [spin] holds
//! the deadline-wait discipline both endpoints share.

pub mod control;
pub mod probe;
pub mod server;
pub mod spin;

pub use control::SlaveControl;
pub use probe::{probe_clock, DEFAULT_PROBE_TIMEOUT};
pub use server::{sync_server, CaptureSlot, FireCommand};
pub use spin::wait_until_us;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("peer unreachable: {source}")]
    Unreachable {
        #[from]
        source: std::io::Error,
    },
    /// Reply deadline missed. Malformed replies count as missed attempts
    /// and surface as this same kind.
    #[error("timed out waiting for reply")]
    Timeout,
    /// A whole probe session passed without one successful sample.
    #[error("no probe replies received")]
    NoReply,
}
