use std::sync::Arc;

use execution::Dispatch;

pub struct AppState {
    pub dispatcher: Arc<dyn Dispatch>,
}
