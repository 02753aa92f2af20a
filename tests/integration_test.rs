mod commons;
mod coordination;
mod credentials;
#[cfg(feature = "etcd")]
mod etcd;
