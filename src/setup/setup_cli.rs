use chrono::Utc;
use clap::{Parser, Subcommand};
use inkpress_backend::config::Config;
use inkpress_backend::helper::slug_helpers::slugify;
use inkpress_backend::models::db_operations::{posts_db_operations, users_db_operations};
use inkpress_backend::setup::db_setup;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "setup_cli", author, version, about = "A CLI for initial application setup.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Creates the content database and its tables. Safe to re-run.
    Setup,
}

#[derive(Subcommand, Debug)]
enum UserAction {
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// admin, moderator or author
        #[arg(long, default_value = "author")]
        role: String,
    },
    List,
    ChangePassword {
        #[arg(long)]
        username: String,
        #[arg(long)]
        new_password: String,
    },
}

#[derive(Subcommand, Debug)]
enum CategoryAction {
    Create {
        #[arg(long)]
        name: String,
    },
    List,
}

fn main() {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file).expect("FATAL: Failed to load or parse configuration.");

    match &cli.command {
        Commands::Db { action: DbAction::Setup } => setup_content_database(&config),
        Commands::User { action } => match action {
            UserAction::Create { username, password, role } => create_user(&config, username, password, role),
            UserAction::List => list_users(&config),
            UserAction::ChangePassword { username, new_password } => change_password(&config, username, new_password),
        },
        Commands::Category { action } => match action {
            CategoryAction::Create { name } => create_category(&config, name),
            CategoryAction::List => list_categories(&config),
        },
    }
}

fn open_content_db(config: &Config) -> Option<Connection> {
    let db_path = config.content_db_path();
    if !db_path.exists() {
        eprintln!(
            "❌ Error: Content database not found at '{}'. Please run `setup_cli db setup` first.",
            db_path.display()
        );
        return None;
    }
    match Connection::open(&db_path).and_then(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;").map(|_| conn)) {
        Ok(conn) => Some(conn),
        Err(e) => {
            eprintln!("❌ Error opening content database: {}", e);
            None
        }
    }
}

fn setup_content_database(config: &Config) {
    let db_path = config.content_db_path();
    println!("\nSetting up content database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    let mut conn = Connection::open(&db_path).expect("Could not create content database file.");
    match db_setup::setup_content_db(&mut conn) {
        Ok(_) => println!("✅ Content database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up content database: {}", e),
    }
}

fn create_user(config: &Config, username: &str, password: &str, role: &str) {
    if !users_db_operations::VALID_ROLES.contains(&role) {
        eprintln!("❌ Error: Unknown role '{}'. Use one of {:?}.", role, users_db_operations::VALID_ROLES);
        return;
    }
    let Some(conn) = open_content_db(config) else { return };

    match users_db_operations::create_user(&conn, username, password, role) {
        Ok(id) => println!("✅ User '{}' ({}) created with id {}.", username, role, id),
        Err(e) => eprintln!("❌ Error creating user: {}. It might be because the username already exists.", e),
    }
}

fn list_users(config: &Config) {
    let Some(conn) = open_content_db(config) else { return };

    match users_db_operations::read_all_users(&conn) {
        Ok(users) => {
            println!("Listing Users:");
            for user in users {
                let status = if user.is_active { "active" } else { "suspended" };
                println!(
                    "- {} [{}] {} (last login: {})",
                    user.username,
                    user.role,
                    status,
                    user.last_login_time.as_deref().unwrap_or("never")
                );
            }
        }
        Err(e) => eprintln!("❌ Error fetching users: {}", e),
    }
}

fn change_password(config: &Config, username: &str, new_password: &str) {
    let Some(conn) = open_content_db(config) else { return };

    match users_db_operations::update_password(&conn, username, new_password) {
        Ok(0) => eprintln!("❌ Error: No user named '{}' found.", username),
        Ok(_) => println!("✅ Password for '{}' changed successfully.", username),
        Err(e) => eprintln!("❌ Error updating password: {}", e),
    }
}

fn create_category(config: &Config, name: &str) {
    let slug = slugify(name);
    if slug.is_empty() {
        eprintln!("❌ Error: Category name '{}' must contain a letter or digit.", name);
        return;
    }
    let Some(conn) = open_content_db(config) else { return };

    match posts_db_operations::create_category(&conn, name.trim(), &slug) {
        Ok(id) => println!("✅ Category '{}' created with id {} and slug '{}'.", name.trim(), id, slug),
        Err(e) => eprintln!("❌ Error creating category: {}. The slug '{}' might already exist.", e, slug),
    }
}

fn list_categories(config: &Config) {
    let Some(conn) = open_content_db(config) else { return };

    match posts_db_operations::read_categories_with_counts(&conn, Utc::now()) {
        Ok(categories) => {
            println!("Listing Categories:");
            for entry in categories {
                println!(
                    "- [{}] {} ({}) - {} live posts",
                    entry.category.id, entry.category.name, entry.category.slug, entry.post_count
                );
            }
        }
        Err(e) => eprintln!("❌ Error fetching categories: {}", e),
    }
}
