pub mod alert_fanout;
pub mod cleanup;
pub mod deliver;
pub mod ingest;
pub mod poll;
pub mod price_refresh;
