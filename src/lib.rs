pub mod app;
pub mod chain;
pub mod config;
pub mod api {
    pub mod auth;
    pub mod error;
    pub mod handlers;
    pub mod models;
    pub mod routes;
}
pub mod bridge {
    pub mod accounts;
    pub mod error;
    pub mod service;
}
pub mod db {
    pub mod client;
    pub mod database;
    pub mod models;
}
pub mod queue {
    pub mod settlement;
}
pub mod relayer {
    pub mod evm_payout;
    pub mod payout;
}
pub mod utils {
    pub mod amount;
    pub mod hash;
    pub mod time;
}
