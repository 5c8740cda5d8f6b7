//! Quote worker that runs on a dedicated blocking thread.
//!
//! Receives [`Tick`]s from a crossbeam channel, resolves each feed token to
//! its trading symbol, and writes the price to the [`QuoteBook`]. It is the
//! only writer of the book.

use ahash::AHashMap;
use crossbeam_channel::Receiver;
use tracing::{debug, info};

use crate::quote_book::QuoteBook;
use crate::touchline::json_parser::Tick;

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub applied: u64,
    /// Priced ticks for tokens with no known symbol yet.
    pub unmapped: u64,
}

/// Run the quote loop on the calling thread until every sender is dropped.
///
/// `token_symbols` seeds the token → symbol map; acknowledgements carrying
/// `ts` extend or correct it.
pub fn run_quote_loop(
    label: &str,
    rx: Receiver<Tick>,
    book: QuoteBook,
    mut token_symbols: AHashMap<String, String>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    info!("[{label}] quote loop started ({} seeded tokens)", token_symbols.len());

    while let Ok(tick) = rx.recv() {
        if let Some(sym) = tick.symbol {
            if token_symbols.get(&tick.token) != Some(&sym) {
                debug!("[{label}] token {} -> {sym}", tick.token);
                token_symbols.insert(tick.token.clone(), sym);
            }
        }

        let Some(price) = tick.price else { continue };
        match token_symbols.get(&tick.token) {
            Some(sym) => {
                book.update(sym, price, tick.recv_ms);
                stats.applied += 1;
            }
            None => stats.unmapped += 1,
        }
    }

    info!(
        "[{label}] quote loop exited (applied={}, unmapped={})",
        stats.applied, stats.unmapped
    );
    stats
}
