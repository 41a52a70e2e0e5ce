// Storage layer: the store interface, its Postgres implementation and the
// repository built on it
pub mod store {
    pub use crate::store::*;
}

pub mod db_storage {
    pub use crate::db_storage::*;
}

pub mod persistence {
    pub use crate::persistence::*;
}
