use std::future::Future;
use std::io;

/// Duplex byte channel to the engine process.
///
/// The channel carries whole frames. It has no request identifiers, so the
/// session never has more than one frame outstanding.
pub trait Transport: Send + Sync + 'static {
    /// Writes one frame; resolves once the channel has accepted it.
    fn write(&self, frame: Vec<u8>) -> impl Future<Output = io::Result<()>> + Send;

    /// Reads the next reply frame.
    fn read(&self) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Tears the channel down without waiting on the engine.
    fn shutdown(&self);
}
