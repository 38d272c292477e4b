//! Session establishment: authentication and reverse tunnel setup

mod connector;
mod tunnel;

pub use connector::SessionConnector;
pub use tunnel::TunnelRequester;
