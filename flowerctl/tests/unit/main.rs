//! Integration tests, run against a fake host


mod test_fsm;
mod test_health;
mod test_nginx_scenario;
mod test_rollback;
mod test_ssl_diagnose;
mod test_tls;
mod test_uninstall;
