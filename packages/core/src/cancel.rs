// keyvault-sync - Interrupt Handling
//
// Ctrl+C stops new work items from starting. Writes already in flight are
// left to finish, so a target never sees a half-issued request from us.
// A second Ctrl+C exits immediately.

use crate::fanout::CancelToken;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Install a SIGINT handler wired to `token`.
///
/// # Example
/// ```no_run
/// use keyvault_sync::cancel::install_interrupt_handler;
/// use keyvault_sync::fanout::CancelToken;
///
/// let token = CancelToken::new();
/// install_interrupt_handler(token.clone());
/// ```
pub fn install_interrupt_handler(token: CancelToken) {
    let presses = Arc::new(AtomicUsize::new(0));

    if let Err(e) = ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) == 0 {
            eprintln!("\n🛑 Interrupted: finishing in-flight requests, no new ones will start");
            eprintln!("   Press Ctrl+C again to exit immediately");
            token.cancel();
        } else {
            std::process::exit(130);
        }
    }) {
        tracing::warn!("Failed to set SIGINT handler: {}", e);
    }
}
