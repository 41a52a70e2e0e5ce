// Domain-layer modules and shared errors/models
pub mod consolidation {
    pub use crate::consolidation::*;
}

pub mod normalizer {
    pub use crate::normalizer::*;
}

pub mod rounds {
    pub use crate::rounds::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
