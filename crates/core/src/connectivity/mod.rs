//! Device reachability tracking

pub mod monitor;

pub use monitor::{
    ConnectivityListener, ConnectivityMonitor, MonitorError, MonitorResult, Subscription,
};
