//! Command line surface: one subcommand per batch command.

use broker_connectors::{Exchange, OrderType, ProductType, TransactionSide};
use clap::{Parser, Subcommand};
use stocksync_core::{BatchCommand, EntryOrder};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replicate a teacher's trades onto student brokerage accounts")]
pub struct Args {
    /// Configuration file path (defaults to stocksync.toml or config/stocksync.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Route orders to the in-process paper brokerage
    #[arg(long, global = true)]
    pub paper: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Enter positions on the teacher and every eligible student
    Enter {
        #[arg(long)]
        teacher_id: i64,
        /// SYMBOL:SIDE:EXCHANGE:ORDER_TYPE:PRODUCT, e.g. NIFTY25AUG24500CE:BUY:NFO:MARKET:INTRADAY
        #[arg(long = "order", required = true, value_parser = parse_entry_order)]
        orders: Vec<EntryOrder>,
        /// Execute on the teacher's account only
        #[arg(long)]
        only_teacher_execute: bool,
    },
    /// Exit every open position of the teacher group
    ExitPending {
        #[arg(long)]
        teacher_id: i64,
    },
    /// Exit one instrument on one account
    ExitInstrument {
        #[arg(long)]
        account_id: i64,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        token: Option<String>,
    },
    /// Exit every open position of one account
    ExitAccount {
        #[arg(long)]
        account_id: i64,
    },
    /// Exit the listed instruments across the teacher group
    ExitSelected {
        #[arg(long)]
        teacher_id: i64,
        #[arg(long = "instrument", required = true)]
        instruments: Vec<String>,
    },
}

impl From<Command> for BatchCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::Enter {
                teacher_id,
                orders,
                only_teacher_execute,
            } => BatchCommand::Enter {
                teacher_id,
                orders,
                only_teacher_execute,
            },
            Command::ExitPending { teacher_id } => BatchCommand::ExitPending { teacher_id },
            Command::ExitInstrument {
                account_id,
                symbol,
                token,
            } => BatchCommand::ExitInstrument {
                account_id,
                symbol,
                token,
            },
            Command::ExitAccount { account_id } => BatchCommand::ExitAccount { account_id },
            Command::ExitSelected {
                teacher_id,
                instruments,
            } => BatchCommand::ExitSelected {
                teacher_id,
                instruments,
            },
        }
    }
}

/// Parse `SYMBOL:SIDE:EXCHANGE:ORDER_TYPE:PRODUCT`
pub fn parse_entry_order(raw: &str) -> Result<EntryOrder, String> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    let [symbol, side, exchange, order_type, product_type] = parts.as_slice() else {
        return Err(format!(
            "expected SYMBOL:SIDE:EXCHANGE:ORDER_TYPE:PRODUCT, got {raw:?}"
        ));
    };
    if symbol.is_empty() {
        return Err("instrument symbol is empty".to_string());
    }

    Ok(EntryOrder {
        instrument: symbol.to_string(),
        side: side.parse::<TransactionSide>().map_err(|e| e.to_string())?,
        exchange: exchange.parse::<Exchange>().map_err(|e| e.to_string())?,
        order_type: order_type.parse::<OrderType>().map_err(|e| e.to_string())?,
        product_type: product_type.parse::<ProductType>().map_err(|e| e.to_string())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_order_argument() {
        let order = parse_entry_order("XYZ25AUG100CE:buy:NFO:MARKET:INTRADAY").unwrap();
        assert_eq!(order.instrument, "XYZ25AUG100CE");
        assert_eq!(order.side, TransactionSide::Buy);
        assert_eq!(order.exchange, Exchange::Nfo);
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.product_type, ProductType::Intraday);
    }

    #[test]
    fn rejects_short_or_unknown_order_arguments() {
        assert!(parse_entry_order("XYZ25AUG100CE:BUY").is_err());
        assert!(parse_entry_order("XYZ25AUG100CE:HOLD:NFO:MARKET:INTRADAY").is_err());
        assert!(parse_entry_order(":BUY:NFO:MARKET:INTRADAY").is_err());
    }
}
