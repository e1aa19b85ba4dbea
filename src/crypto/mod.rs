pub mod blob;
pub mod cipher;
pub mod data_key_cache;
