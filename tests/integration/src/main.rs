mod helpers;

mod replication;
mod resize;
mod sync;
