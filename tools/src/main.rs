//! fee-runner: headless JSON-lines driver for the fee engine.
//!
//! Usage:
//!   fee-runner --db fees.db --data-dir ./data
//!
//! One command per stdin line, one JSON reply per stdout line:
//!   {"type":"create_payment","user_id":1,"amount":"100.00"}
//!   {"type":"validate_formula","formula":"x*y+0.05"}

use anyhow::Result;
use feebook_core::{
    config::EngineConfig,
    engine::{FeeEngine, PaymentOutcome},
    lifecycle::FeeRecord,
    plan::{FeePlan, FeeSchedule},
    store::FeeStore,
    types::{PaymentItemId, UserId},
};
use rust_decimal::Decimal;
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetPlan {
        user_id: UserId,
    },
    SavePlan {
        user_id:       UserId,
        max_fee_ratio: Decimal,
        schedule:      FeeSchedule,
    },
    ValidateFormula {
        formula: String,
    },
    Quote {
        user_id: UserId,
        amount:  Decimal,
    },
    CreatePayment {
        user_id:     UserId,
        amount:      Decimal,
        #[serde(default)]
        description: Option<String>,
    },
    UpdatePayment {
        item_id: PaymentItemId,
        amount:  Decimal,
    },
    DeletePayment {
        item_id: PaymentItemId,
    },
    Quit,
}

#[derive(serde::Serialize)]
struct PaymentReply {
    item_id:         PaymentItemId,
    user_id:         UserId,
    stored_amount:   Decimal,
    fee:             Decimal,
    fee_record:      Option<FeeRecord>,
    fallback_reason: Option<String>,
}

impl From<PaymentOutcome> for PaymentReply {
    fn from(o: PaymentOutcome) -> Self {
        Self {
            item_id:         o.item.item_id,
            user_id:         o.item.user_id,
            stored_amount:   o.item.amount,
            fee:             o.fee,
            fee_record:      o.record,
            fallback_reason: o.fallback_reason,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");

    let config = EngineConfig::load(data_dir)?;
    let store = FeeStore::open(db)?;
    store.migrate()?;
    log::info!(
        "fee-runner: db={} data_dir={data_dir}",
        store.path().unwrap_or(":memory:")
    );

    let engine = FeeEngine::new(store, config);
    run_ipc_loop(&engine)
}

fn run_ipc_loop(engine: &FeeEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(engine, cmd) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("fee-runner: command failed: {e}");
                serde_json::json!({ "error": e.to_string() })
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &FeeEngine, cmd: IpcCommand) -> Result<serde_json::Value> {
    let value = match cmd {
        IpcCommand::GetPlan { user_id } => {
            let plan = engine.fee_plan(user_id)?;
            let curves = engine.fee_curves(user_id)?;
            serde_json::json!({ "plan": plan, "curves": curves })
        }
        IpcCommand::SavePlan { user_id, max_fee_ratio, schedule } => {
            let mut plan = FeePlan::default_for(user_id, engine.config());
            plan.max_fee_ratio = max_fee_ratio;
            plan.schedule = schedule;
            let saved = engine.save_fee_plan(plan)?;
            serde_json::json!({ "plan": saved })
        }
        IpcCommand::ValidateFormula { formula } => {
            serde_json::to_value(engine.validate_formula(&formula))?
        }
        IpcCommand::Quote { user_id, amount } => {
            serde_json::to_value(engine.quote_fee(user_id, amount, None)?)?
        }
        IpcCommand::CreatePayment { user_id, amount, description } => {
            let outcome = engine.create_payment_item(user_id, amount, description.as_deref())?;
            serde_json::to_value(PaymentReply::from(outcome))?
        }
        IpcCommand::UpdatePayment { item_id, amount } => {
            let outcome = engine.update_payment_amount(item_id, amount)?;
            serde_json::to_value(PaymentReply::from(outcome))?
        }
        IpcCommand::DeletePayment { item_id } => {
            engine.delete_payment_item(item_id)?;
            serde_json::json!({ "deleted": item_id })
        }
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
