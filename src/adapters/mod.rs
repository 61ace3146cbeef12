// Adapters layer: concrete implementations of the domain ports (city catalog, lane input, HTTP clients, storage)

pub mod city_store;
pub mod csv_source;
pub mod http;
pub mod storage;
