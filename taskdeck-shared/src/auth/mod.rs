/// Authentication and authorization primitives
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and validation
/// - [`otp`]: Emailed one-time verification codes
/// - [`totp`]: Authenticator app enrollment and verification
/// - [`authorization`]: Project ownership and membership rules
///
/// # Security Features
///
/// - **Password Hashing**: Argon2id with 64 MB memory, 3 iterations
/// - **One-time Codes**: 6 digits, single use, a new code supersedes older ones
/// - **TOTP**: SHA1, 6 digits, 30 second step, one step of clock skew
///
/// # Example
///
/// ```no_run
/// use taskdeck_shared::auth::password::{hash_password, verify_password};
/// use taskdeck_shared::auth::totp::{generate_secret, TotpSettings};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("user_password")?;
/// assert!(verify_password("user_password", &hash)?);
///
/// let totp = TotpSettings::new(&generate_secret(), "Taskdeck", "ada@example.com")?;
/// println!("{}", totp.provisioning_uri());
/// # Ok(())
/// # }
/// ```

pub mod authorization;
pub mod otp;
pub mod password;
pub mod totp;
