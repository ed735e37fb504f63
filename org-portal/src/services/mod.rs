pub mod auth_client;
pub mod metrics;
pub mod profile_client;
pub mod storage_client;
pub mod supabase;

pub use auth_client::{AuthProvider, SupabaseAuthClient};
pub use profile_client::{ProfileStore, SupabaseProfileClient};
pub use storage_client::{AssetStore, SupabaseStorageClient};
pub use supabase::SupabaseConnection;
