pub use resoctrl_protocol::*;
