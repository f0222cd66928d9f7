/// State management module
/// 
/// This module handles all session state, including:
/// - The photo ledger file (ledger.rs)
/// - Shared data structures and operation outcomes (data.rs)
/// - The soft-delete holding area (trash.rs)
/// - The crash-recovery breadcrumb (recovery.rs)
/// - The session engine tying them together (session.rs)
/// - Background ledger persistence (writer.rs)

pub mod data;
pub mod error;
pub mod ledger;
pub mod recovery;
pub mod session;
pub mod trash;
pub mod writer;
