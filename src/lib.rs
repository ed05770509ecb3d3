pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod repositories;
pub mod routes;
pub mod state;
pub mod validation;

pub mod models {
    pub mod character;
    pub mod conversation;
    pub mod message;
    pub mod session;
    pub mod stream;
    pub mod user;
}

pub mod services {
    pub mod auth;
    pub mod characters;
    pub mod chat;
    pub mod gateway;
    pub mod rate_limit;
    pub mod response_cache;
    pub mod session;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod rate_limit;
}
