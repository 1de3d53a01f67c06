pub mod rbc;

pub use rbc::ReliableBroadcast;
