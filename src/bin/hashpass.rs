//! Prints an Argon2 hash for seeding clinic_user.password_hash by hand.

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};

fn main() -> anyhow::Result<()> {
    let Some(password) = std::env::args().nth(1) else {
        eprintln!("usage: hashpass <password>");
        std::process::exit(2);
    };
    if password.trim().len() < 8 {
        anyhow::bail!("password must be at least 8 characters");
    }

    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hash error: {e}"))?
        .to_string();
    println!("{phc}");
    Ok(())
}
