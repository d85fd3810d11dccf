use crate::{
    crypto::password::CredentialHasher,
    error::{AppError, Result},
};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Sliding window over which attempts are counted.
const RATE_WINDOW_MINUTES: i64 = 5;
/// Failed logins before the account locks.
const LOCKOUT_THRESHOLD: u32 = 5;
/// How long a lockout lasts.
const LOCKOUT_MINUTES: i64 = 30;
/// Lifetime of an issued two-factor code.
const TWO_FACTOR_CODE_TTL_MINUTES: i64 = 5;
/// How many previous password hashes are kept per user.
const PASSWORD_HISTORY_DEPTH: usize = 5;

/// Per-action attempt ceilings inside the rate window.
fn max_attempts_for(action: &str) -> usize {
    match action {
        "login" => 10,
        "password_reset" => 3,
        "two_factor" => 5,
        _ => 20,
    }
}

struct TwoFactorChallenge {
    code: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct GateState {
    /// Keyed by `"{identifier}:{action}"`; holds attempt timestamps
    /// still inside the window.
    rate_windows: HashMap<String, Vec<DateTime<Utc>>>,
    failed_attempts: HashMap<Uuid, u32>,
    lockouts: HashMap<Uuid, DateTime<Utc>>,
    two_factor: HashMap<Uuid, TwoFactorChallenge>,
    password_history: HashMap<Uuid, Vec<String>>,
    trusted_devices: HashMap<Uuid, HashSet<String>>,
}

/// In-process security policy state: rate limiting, lockouts,
/// two-factor challenges, password history and trusted devices.
///
/// All state sits behind one mutex; every operation is a short
/// lock-mutate-unlock, so the guard is never held across an await.
pub struct SecurityGate {
    state: Mutex<GateState>,
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        // A poisoned mutex here means a panic mid-update of plain
        // collections; the data is still structurally sound.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- Rate limiting ---

    /// Whether another attempt for `identifier`/`action` is allowed.
    /// Does not record the attempt; callers pair this with
    /// [`record_attempt`](Self::record_attempt).
    pub fn check_rate_limit(&self, identifier: &str, action: &str) -> bool {
        self.check_rate_limit_at(identifier, action, Utc::now())
    }

    pub(crate) fn check_rate_limit_at(
        &self,
        identifier: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let key = format!("{identifier}:{action}");
        let cutoff = now - Duration::minutes(RATE_WINDOW_MINUTES);
        let mut state = self.lock();

        let window = state.rate_windows.entry(key).or_default();
        window.retain(|t| *t > cutoff);
        window.len() < max_attempts_for(action)
    }

    /// Records one attempt for `identifier`/`action`. Recorded whether
    /// or not the attempt ultimately succeeds.
    pub fn record_attempt(&self, identifier: &str, action: &str) {
        self.record_attempt_at(identifier, action, Utc::now());
    }

    pub(crate) fn record_attempt_at(&self, identifier: &str, action: &str, now: DateTime<Utc>) {
        let key = format!("{identifier}:{action}");
        let mut state = self.lock();
        state.rate_windows.entry(key).or_default().push(now);
    }

    /// Seconds until the oldest attempt in the window ages out.
    pub fn rate_limit_retry_after(&self, identifier: &str, action: &str) -> i64 {
        self.rate_limit_retry_after_at(identifier, action, Utc::now())
    }

    pub(crate) fn rate_limit_retry_after_at(
        &self,
        identifier: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> i64 {
        let key = format!("{identifier}:{action}");
        let state = self.lock();

        state
            .rate_windows
            .get(&key)
            .and_then(|window| window.iter().min())
            .map(|oldest| {
                let expires = *oldest + Duration::minutes(RATE_WINDOW_MINUTES);
                (expires - now).num_seconds().max(0)
            })
            .unwrap_or(0)
    }

    // --- Account lockout ---

    /// Whether the account is currently locked out. An expired lockout
    /// is cleared here, together with the failure counter, so the next
    /// attempt starts fresh.
    pub fn is_account_locked(&self, user_id: Uuid) -> bool {
        self.is_account_locked_at(user_id, Utc::now())
    }

    pub(crate) fn is_account_locked_at(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        match state.lockouts.get(&user_id) {
            Some(until) if *until > now => true,
            Some(_) => {
                state.lockouts.remove(&user_id);
                state.failed_attempts.remove(&user_id);
                false
            }
            None => false,
        }
    }

    /// Minutes left on an active lockout, rounded up. Zero when not
    /// locked.
    pub fn lockout_time_remaining(&self, user_id: Uuid) -> i64 {
        self.lockout_time_remaining_at(user_id, Utc::now())
    }

    pub(crate) fn lockout_time_remaining_at(&self, user_id: Uuid, now: DateTime<Utc>) -> i64 {
        let state = self.lock();
        state
            .lockouts
            .get(&user_id)
            .filter(|until| **until > now)
            .map(|until| {
                let secs = (*until - now).num_seconds();
                (secs + 59) / 60
            })
            .unwrap_or(0)
    }

    /// Bumps the failure counter after a rejected credential. Reaching
    /// the threshold locks the account for 30 minutes. Returns the new
    /// count.
    pub fn increment_failed_login_attempts(&self, user_id: Uuid) -> u32 {
        self.increment_failed_login_attempts_at(user_id, Utc::now())
    }

    pub(crate) fn increment_failed_login_attempts_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> u32 {
        let mut state = self.lock();
        let count = state.failed_attempts.entry(user_id).or_insert(0);
        *count += 1;
        let count = *count;

        if count >= LOCKOUT_THRESHOLD {
            state
                .lockouts
                .insert(user_id, now + Duration::minutes(LOCKOUT_MINUTES));
            tracing::warn!(%user_id, failed_attempts = count, "Account locked after repeated failures");
        }
        count
    }

    /// Clears the failure counter and any lockout after a successful
    /// authentication.
    pub fn reset_failed_login_attempts(&self, user_id: Uuid) {
        let mut state = self.lock();
        state.failed_attempts.remove(&user_id);
        state.lockouts.remove(&user_id);
    }

    /// Administrative lock, independent of the failure counter.
    pub fn lock_account(&self, user_id: Uuid, minutes: i64) {
        self.lock_account_at(user_id, minutes, Utc::now());
    }

    pub(crate) fn lock_account_at(&self, user_id: Uuid, minutes: i64, now: DateTime<Utc>) {
        let mut state = self.lock();
        state.lockouts.insert(user_id, now + Duration::minutes(minutes));
    }

    /// Administrative unlock; also clears the failure counter.
    pub fn unlock_account(&self, user_id: Uuid) {
        let mut state = self.lock();
        state.lockouts.remove(&user_id);
        state.failed_attempts.remove(&user_id);
    }

    // --- Two-factor challenges ---

    /// Issues a fresh 6-digit code for the user, replacing any prior
    /// outstanding challenge. Valid for 5 minutes.
    pub fn generate_two_factor_code(&self, user_id: Uuid) -> String {
        self.generate_two_factor_code_at(user_id, Utc::now())
    }

    pub(crate) fn generate_two_factor_code_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> String {
        let code = format!("{:06}", OsRng.gen_range(100_000..1_000_000));
        let mut state = self.lock();
        state.two_factor.insert(
            user_id,
            TwoFactorChallenge {
                code: code.clone(),
                expires_at: now + Duration::minutes(TWO_FACTOR_CODE_TTL_MINUTES),
            },
        );
        code
    }

    /// Validates a submitted code. An expired challenge is removed and
    /// rejected; a wrong code leaves the unexpired challenge in place;
    /// a correct code is consumed.
    pub fn validate_two_factor_code(&self, user_id: Uuid, code: &str) -> bool {
        self.validate_two_factor_code_at(user_id, code, Utc::now())
    }

    pub(crate) fn validate_two_factor_code_at(
        &self,
        user_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let mut state = self.lock();

        let Some(challenge) = state.two_factor.get(&user_id) else {
            return false;
        };

        if now >= challenge.expires_at {
            state.two_factor.remove(&user_id);
            return false;
        }

        let matches: bool = challenge
            .code
            .as_bytes()
            .ct_eq(code.as_bytes())
            .into();

        if matches {
            state.two_factor.remove(&user_id);
        }
        matches
    }

    // --- Password policy ---

    /// Whether this password verifies against any of the user's last
    /// five recorded hashes.
    pub fn is_password_reused(
        &self,
        user_id: Uuid,
        password: &str,
        hasher: &dyn CredentialHasher,
    ) -> Result<bool> {
        let history: Vec<String> = {
            let state = self.lock();
            state
                .password_history
                .get(&user_id)
                .cloned()
                .unwrap_or_default()
        };

        for hash in &history {
            if hasher.verify(password, hash)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Records a newly set password hash, keeping only the most recent
    /// five.
    pub fn record_password(&self, user_id: Uuid, hash: String) {
        let mut state = self.lock();
        let history = state.password_history.entry(user_id).or_default();
        history.push(hash);
        if history.len() > PASSWORD_HISTORY_DEPTH {
            let excess = history.len() - PASSWORD_HISTORY_DEPTH;
            history.drain(..excess);
        }
    }

    // --- Trusted devices ---

    /// Marks a device as trusted for the user.
    pub fn trust_device(&self, user_id: Uuid, device_id: &str) {
        let mut state = self.lock();
        state
            .trusted_devices
            .entry(user_id)
            .or_default()
            .insert(device_id.to_string());
    }

    /// Removes a device from the user's trusted set.
    pub fn forget_device(&self, user_id: Uuid, device_id: &str) {
        let mut state = self.lock();
        if let Some(devices) = state.trusted_devices.get_mut(&user_id) {
            devices.remove(device_id);
        }
    }

    /// Whether the device may skip the two-factor step. Registration is
    /// tracked, but skipping is not yet honored: this always returns
    /// false so every login completes the full challenge.
    pub fn is_trusted_device(&self, _user_id: Uuid, _device_id: &str) -> bool {
        false
    }
}

/// Checks a candidate password against the strength policy: at least
/// 8 characters with upper, lower, digit and special characters.
pub fn validate_password_strength(password: &str) -> Result<()> {
    let mut problems = Vec::new();

    if password.len() < 8 {
        problems.push("at least 8 characters");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        problems.push("an uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        problems.push("a lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        problems.push("a digit");
    }
    if !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        problems.push("a special character");
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Password must contain {}",
            problems.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::password::Argon2Hasher;

    #[test]
    fn rate_limit_enforces_login_ceiling() {
        let gate = SecurityGate::new();
        let now = Utc::now();

        for _ in 0..10 {
            assert!(gate.check_rate_limit_at("1.2.3.4:a@b.com", "login", now));
            gate.record_attempt_at("1.2.3.4:a@b.com", "login", now);
        }
        assert!(!gate.check_rate_limit_at("1.2.3.4:a@b.com", "login", now));

        // A different key is unaffected.
        assert!(gate.check_rate_limit_at("5.6.7.8:a@b.com", "login", now));
    }

    #[test]
    fn rate_limit_window_slides() {
        let gate = SecurityGate::new();
        let start = Utc::now();

        for _ in 0..10 {
            gate.record_attempt_at("ip:user", "login", start);
        }
        assert!(!gate.check_rate_limit_at("ip:user", "login", start));

        // Attempts age out of the 5-minute window.
        let later = start + Duration::minutes(5) + Duration::seconds(1);
        assert!(gate.check_rate_limit_at("ip:user", "login", later));
        assert_eq!(gate.rate_limit_retry_after_at("ip:user", "login", later), 0);
    }

    #[test]
    fn rate_limit_ceilings_differ_by_action() {
        let gate = SecurityGate::new();
        let now = Utc::now();

        for _ in 0..3 {
            gate.record_attempt_at("k", "password_reset", now);
        }
        assert!(!gate.check_rate_limit_at("k", "password_reset", now));

        for _ in 0..5 {
            gate.record_attempt_at("k", "two_factor", now);
        }
        assert!(!gate.check_rate_limit_at("k", "two_factor", now));

        for _ in 0..19 {
            gate.record_attempt_at("k", "profile_update", now);
        }
        assert!(gate.check_rate_limit_at("k", "profile_update", now));
        gate.record_attempt_at("k", "profile_update", now);
        assert!(!gate.check_rate_limit_at("k", "profile_update", now));
    }

    #[test]
    fn retry_after_counts_down_from_oldest_attempt() {
        let gate = SecurityGate::new();
        let start = Utc::now();

        gate.record_attempt_at("k", "login", start);
        gate.record_attempt_at("k", "login", start + Duration::minutes(2));

        let after = gate.rate_limit_retry_after_at("k", "login", start + Duration::minutes(3));
        assert_eq!(after, 120);
    }

    #[test]
    fn fifth_failure_locks_for_thirty_minutes() {
        let gate = SecurityGate::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        for i in 1..=4 {
            assert_eq!(gate.increment_failed_login_attempts_at(user, now), i);
            assert!(!gate.is_account_locked_at(user, now));
        }
        assert_eq!(gate.increment_failed_login_attempts_at(user, now), 5);
        assert!(gate.is_account_locked_at(user, now));
        assert_eq!(gate.lockout_time_remaining_at(user, now), 30);

        // Expired lockout clears itself and resets the counter.
        let later = now + Duration::minutes(30) + Duration::seconds(1);
        assert!(!gate.is_account_locked_at(user, later));
        assert_eq!(gate.increment_failed_login_attempts_at(user, later), 1);
    }

    #[test]
    fn successful_login_resets_the_counter() {
        let gate = SecurityGate::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        for _ in 0..4 {
            gate.increment_failed_login_attempts_at(user, now);
        }
        gate.reset_failed_login_attempts(user);

        assert_eq!(gate.increment_failed_login_attempts_at(user, now), 1);
        assert!(!gate.is_account_locked_at(user, now));
    }

    #[test]
    fn unlock_clears_lock_and_counter() {
        let gate = SecurityGate::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        gate.lock_account_at(user, 30, now);
        assert!(gate.is_account_locked_at(user, now));

        gate.unlock_account(user);
        assert!(!gate.is_account_locked_at(user, now));
        assert_eq!(gate.lockout_time_remaining_at(user, now), 0);
    }

    #[test]
    fn two_factor_code_lifecycle() {
        let gate = SecurityGate::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let code = gate.generate_two_factor_code_at(user, now);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        // Wrong code leaves the challenge standing.
        assert!(!gate.validate_two_factor_code_at(user, "000000", now));
        assert!(gate.validate_two_factor_code_at(user, &code, now));

        // Correct code is single-use.
        assert!(!gate.validate_two_factor_code_at(user, &code, now));
    }

    #[test]
    fn two_factor_code_expires_after_five_minutes() {
        let gate = SecurityGate::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let code = gate.generate_two_factor_code_at(user, now);
        let expired = now + Duration::minutes(5);
        assert!(!gate.validate_two_factor_code_at(user, &code, expired));

        // Expiry removed the challenge entirely.
        assert!(!gate.validate_two_factor_code_at(user, &code, now));
    }

    #[test]
    fn regenerating_replaces_the_previous_code() {
        let gate = SecurityGate::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let first = gate.generate_two_factor_code_at(user, now);
        let second = gate.generate_two_factor_code_at(user, now);

        if first != second {
            assert!(!gate.validate_two_factor_code_at(user, &first, now));
        }
        assert!(gate.validate_two_factor_code_at(user, &second, now));
    }

    #[test]
    fn password_strength_policy() {
        assert!(validate_password_strength("Str0ng!pass").is_ok());

        assert!(validate_password_strength("Ab1!").is_err());
        assert!(validate_password_strength("alllower1!").is_err());
        assert!(validate_password_strength("ALLUPPER1!").is_err());
        assert!(validate_password_strength("NoDigitsHere!").is_err());
        assert!(validate_password_strength("NoSpecial123").is_err());
    }

    #[test]
    fn password_history_keeps_last_five() {
        let gate = SecurityGate::new();
        let user = Uuid::new_v4();
        let hasher = Argon2Hasher;

        let old_hash = hasher.hash("OldPass1!").unwrap();
        gate.record_password(user, old_hash);
        for i in 0..5 {
            gate.record_password(user, hasher.hash(&format!("Filler{i}!a")).unwrap());
        }

        // The oldest entry fell off the 5-deep history.
        assert!(!gate.is_password_reused(user, "OldPass1!", &hasher).unwrap());
        assert!(gate.is_password_reused(user, "Filler4!a", &hasher).unwrap());
    }

    #[test]
    fn trusted_devices_never_skip_the_challenge() {
        let gate = SecurityGate::new();
        let user = Uuid::new_v4();

        gate.trust_device(user, "device-123");
        assert!(!gate.is_trusted_device(user, "device-123"));
    }
}
