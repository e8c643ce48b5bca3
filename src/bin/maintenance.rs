use std::env;

use anyhow::{bail, Context, Result};

use labinsight::{
    accounts::{self, Registration},
    config::AppConfig,
    db,
    models::Role,
    storage::{LocalStorage, ObjectStorage},
};

const USAGE: &str = "Usage:\n  maintenance create-admin <name> <email> <password>\n  maintenance purge-orphans";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).compact().init();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["create-admin", name, email, password] => create_admin(name, email, password)?,
        ["purge-orphans"] => purge_orphans().await?,
        [cmd, ..] => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        [] => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect(config: &AppConfig) -> Result<db::PgPool> {
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let mut conn = pool.get().context("failed to get database connection")?;
    db::run_migrations(&mut conn)?;
    Ok(pool)
}

fn create_admin(name: &str, email: &str, password: &str) -> Result<()> {
    let config = AppConfig::from_env()?;
    let pool = connect(&config)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let admin = match accounts::register(
        &mut conn,
        Registration {
            name,
            email,
            password: Some(password),
            role: Role::Admin,
        },
    ) {
        Ok(user) => user,
        Err(accounts::AccountError::EmailTaken) => bail!("an account for {email} already exists"),
        Err(err) => return Err(err).context("failed to create admin"),
    };

    println!("Created admin {} ({})", admin.email, admin.id);
    Ok(())
}

async fn purge_orphans() -> Result<()> {
    let config = AppConfig::from_env()?;
    let pool = connect(&config)?;
    let storage = LocalStorage::new(config.upload_dir.clone());

    let purge = {
        let mut conn = pool.get().context("failed to get database connection")?;
        accounts::purge_orphans(&mut conn).context("failed to purge orphaned rows")?
    };

    println!(
        "Removed {} profiles, {} doctor details, {} reports, {} assignments, {} requests.",
        purge.profiles,
        purge.doctor_details,
        purge.report_files.len(),
        purge.assignments,
        purge.connection_requests
    );

    for key in &purge.report_files {
        if let Err(err) = storage.delete_object(key).await {
            eprintln!("Failed to delete report file {key}: {err}");
        }
    }
    Ok(())
}
