use sales_ledger_engine::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn print_report(engine: &SalesEngine) -> Result<()> {
    println!("📊 Product sales");
    for product in engine.product_sales()? {
        println!(
            "   {:<14} {:>12.2}  {:>6.2}%",
            product.product_type, product.total_margin, product.percentage_of_total
        );
    }

    println!("\n🏆 Leaderboard");
    for rep in engine.sales_leaderboard()? {
        println!("   #{:<3} {:<20} {:>12.2}", rep.rank, rep.sales_rep, rep.total_margin);
    }

    println!("\n🏢 Department / LOB");
    for lob in engine.department_lob()? {
        println!(
            "   {:<14} target {:>12.2}  ytd {:>12.2}",
            lob.lob, lob.margin_target, lob.margin_ytd
        );
    }

    println!("\nPending:     {:>12.2}", engine.pending_amount()?);
    println!("In progress: {:>12.2}", engine.in_progress_amount()?);
    if let Some(report) = engine.last_report() {
        println!(
            "Loaded {} of {} rows from '{}' ({} skipped)",
            report.loaded,
            report.total_rows,
            report.sheet_name,
            report.skipped()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sales.xlsx"));

    let engine = Arc::new(SalesEngine::new(EngineConfig::for_workbook(&path))?);
    print_report(&engine)?;

    println!("\n👀 Watching {} (Ctrl+C to stop)", path.display());
    let token = CancellationToken::new();
    let mut handle = watch_for_changes(Arc::clone(&engine), token.clone());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                token.cancel();
                break;
            }
            update = handle.next_update() => match update {
                Some(update) => {
                    println!("\n🔄 Reloaded (generation {}, modified {})", update.generation, update.last_modified);
                    print_report(&engine)?;
                }
                None => break,
            }
        }
    }

    engine.shutdown();
    handle.join().await;
    Ok(())
}
