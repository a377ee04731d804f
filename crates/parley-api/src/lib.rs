pub mod error;
pub mod forward;
pub mod messages;
pub mod middleware;
pub mod recall;
pub mod rooms;

use std::sync::Arc;

use parley_db::Database;
use parley_gateway::Registry;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub registry: Registry,
    pub jwt_secret: String,
}
