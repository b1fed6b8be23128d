use r2d2::Pool;
use r2d2_oracle::OracleConnectionManager;
use std::env;
use std::fs;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    // Load .env if it exists
    dotenvy::dotenv().ok();

    println!("Starting database migration...");

    let username = env::var("DB_USER").expect("DB_USER must be set");
    let password = env::var("DB_PASSWORD").expect("DB_PASSWORD must be set");
    let conn_str = env::var("DB_CONNECT_STRING").expect("DB_CONNECT_STRING must be set");

    println!("Connecting to database (60s timeout)...");
    let manager = OracleConnectionManager::new(&username, &password, &conn_str);
    let pool = Pool::builder()
        .max_size(1)
        .connection_timeout(std::time::Duration::from_secs(60))
        .build(manager)
        .map_err(|e| anyhow::anyhow!("Failed to create DB pool: {}", e))?;

    let conn = pool.get()?;

    let migration_path =
        env::var("MIGRATION_FILE").unwrap_or_else(|_| "migrations/init.sql".to_string());

    if !Path::new(&migration_path).exists() {
        println!("Migration file not found at: {}", migration_path);
        return Ok(());
    }

    let sql_content = fs::read_to_string(&migration_path)?;

    // Strip line comments, then run statement-at-a-time; the driver does not
    // take multi-statement scripts.
    let cleaned: String = sql_content
        .lines()
        .filter(|l| !l.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    let statements: Vec<&str> = cleaned
        .split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    for sql in statements {
        println!("Executing: {:.50}...", sql);
        match conn.execute(sql, &[]) {
            Ok(_) => println!("Success."),
            Err(e) => {
                let err_msg = e.to_string();
                // ORA-00955: name already used. Re-running the migration is
                // expected to skip objects that already exist.
                if err_msg.contains("ORA-00955") {
                    println!("Skipping (object already exists).");
                } else {
                    return Err(anyhow::anyhow!("Migration failed: {}", e));
                }
            }
        }
    }

    conn.commit()?;
    println!("Migration complete and committed.");
    Ok(())
}
