use std::collections::HashMap;
use std::env;

use anyhow::{anyhow, bail, Context, Result};
use diesel::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use leadsign::{
    access::Role,
    auth::password::{hash_password, MIN_PASSWORD_LENGTH},
    config::AppConfig,
    db,
    ledger::{audit_running_totals, commission_amount, CommissionStatus},
    models::{Commission, NewUser, User},
    schema::{commissions, users},
    utils::validate::normalize_email,
};

const USAGE: &str = "Usage:
  maintenance create-user <email> <name> <role>   (password read from LEADSIGN_PASSWORD)
  maintenance check-ledger [--fix]";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("create-user") => create_user(&args[1..])?,
        Some("check-ledger") => check_ledger(args.iter().any(|arg| arg == "--fix"))?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok(pool)
}

fn create_user(args: &[String]) -> Result<()> {
    let [email, name, role] = args else {
        bail!("{USAGE}");
    };
    let email = normalize_email(email).ok_or_else(|| anyhow!("invalid email: {email}"))?;
    let role: Role = role.parse().map_err(|err: String| anyhow!(err))?;
    let password = env::var("LEADSIGN_PASSWORD").context("LEADSIGN_PASSWORD must be set")?;
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        bail!("password must be at least {MIN_PASSWORD_LENGTH} characters");
    }

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let user: User = diesel::insert_into(users::table)
        .values(&NewUser {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            email,
            password_hash: hash_password(&password)?,
            role,
            commission_rate: Decimal::ZERO,
        })
        .get_result(&mut conn)
        .context("failed to insert user")?;

    println!("Created {} user {} ({})", user.role, user.email, user.id);
    Ok(())
}

/// Compares stored commission amounts with `loanAmount * rate / 100` and every
/// running total with the sum of that referrer's paid commissions. `--fix`
/// rewrites drifted amounts only; running totals are reported, never written.
fn check_ledger(fix: bool) -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    conn.transaction::<(), anyhow::Error, _>(|conn| {
        let rows: Vec<Commission> = commissions::table
            .for_update()
            .load(conn)
            .context("failed to load commissions")?;

        let mut drifted = 0usize;
        for commission in &rows {
            let expected = match commission_amount(commission.loan_amount, commission.rate) {
                Ok(expected) => expected,
                Err(err) => {
                    println!("commission {}: {err}", commission.id);
                    continue;
                }
            };
            if commission.amount != expected {
                drifted += 1;
                println!(
                    "commission {}: stored {} expected {}",
                    commission.id, commission.amount, expected
                );
                if fix {
                    diesel::update(commissions::table.find(commission.id))
                        .set(commissions::amount.eq(expected))
                        .execute(conn)?;
                }
            }
        }

        let accounts: Vec<User> = users::table.load(conn).context("failed to load users")?;
        let emails: HashMap<Uuid, &str> = accounts
            .iter()
            .map(|account| (account.id, account.email.as_str()))
            .collect();
        let mismatches = audit_running_totals(
            rows.iter()
                .filter(|c| c.status == CommissionStatus::Paid)
                .map(|c| (c.referrer_id, c.amount)),
            accounts
                .iter()
                .map(|account| (account.id, account.total_commission_earned)),
        );
        for mismatch in &mismatches {
            println!(
                "user {}: running total {} but paid commissions sum to {} (review manually)",
                emails.get(&mismatch.referrer_id).copied().unwrap_or("?"),
                mismatch.stored,
                mismatch.paid_sum
            );
        }

        println!(
            "{} commissions checked, {drifted} amount(s) drifted{}; {} users checked, {} total(s) off",
            rows.len(),
            if fix && drifted > 0 { " (fixed)" } else { "" },
            accounts.len(),
            mismatches.len()
        );
        Ok(())
    })
}
