use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn},
    notify::NotificationDispatcher,
    payment::PaymentGateway,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub config: AppConfig,
}
