pub mod backup;
pub mod etcd_cluster;

pub use backup::*;
pub use etcd_cluster::*;
