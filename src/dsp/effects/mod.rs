//! Engine-level effects. The core carries a single ping-pong delay as
//! its FX send; everything else is out of scope.

pub mod delay;

pub use delay::PingPongDelay;
