//! Built-in request handlers.

pub mod calculate;
pub mod clock;
pub mod echo;
pub mod fail;
pub mod ping;

pub use calculate::CalculateHandler;
pub use clock::ClockHandler;
pub use echo::EchoHandler;
pub use fail::FailHandler;
pub use ping::PingHandler;
