//! flowerctl library
//!
//! Installs the Celery Flower dashboard behind Apache or Nginx: a systemd
//! service for the dashboard, a reverse proxy site with optional basic auth,
//! IP allow-list and Let's Encrypt certificate.

pub mod auth;
pub mod context;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod installer;
pub mod logs;
pub mod models;
pub mod probe;
pub mod proxy;
pub mod render;
pub mod runner;
pub mod service;
pub mod storage;
pub mod tls;
pub mod utils;
pub mod webserver;
