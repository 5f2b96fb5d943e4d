use std::sync::Arc;

use crate::gateway::Gateway;

pub struct AppState {
    pub gateway: Arc<Gateway>,
}
