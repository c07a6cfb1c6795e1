mod common;

mod echo_loopback;
mod file_transfer_accept;
mod framing_over_loopback;
mod group_fanout;
mod group_relay;
mod message_retry_exhaustion;
