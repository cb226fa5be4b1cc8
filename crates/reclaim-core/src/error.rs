use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot move cart {cart_id} from {from} to {to}")]
    InvalidTransition {
        cart_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn cart_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "cart",
            id: id.to_string(),
        }
    }

    pub fn action_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "recovery action",
            id: id.to_string(),
        }
    }
}
