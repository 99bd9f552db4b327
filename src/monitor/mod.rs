//! Filesystem monitoring: free-space measurement for disk-pressure gating.

pub mod disk_space;
