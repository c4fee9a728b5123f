//! Device identities, opaque tokens and the validation cache
//!
//! Devices are long-lived identities gating every sync request. Tokens are
//! 32 bytes of OS randomness behind a stable prefix; only their memory-hard
//! argon2 digests are ever stored. Validation runs through a process-local
//! cache keyed by the SHA-256 of the plaintext so the slow digest is the
//! only costly step, and even cache hits re-verify the digest.

use crate::error::{Result, SyncError};
use crate::logging::*;
use crate::store;
use crate::util;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::RwLock;

/// Wire prefix of access tokens.
pub const ACCESS_TOKEN_PREFIX: &str = "nos_dt_";

/// Wire prefix of refresh tokens.
pub const REFRESH_TOKEN_PREFIX: &str = "nos_rt_";

// 32 random bytes render to 43 chars of unpadded URL-safe base64
const TOKEN_BODY_LEN: usize = 43;

// Soft ceiling on one argon2 verification
const VERIFY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Platform a device runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
	Windows,
	Linux,
	Macos,
	Android,
	Ios,
}

impl FromStr for DeviceType {
	type Err = SyncError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"windows" => Ok(DeviceType::Windows),
			"linux" => Ok(DeviceType::Linux),
			"macos" => Ok(DeviceType::Macos),
			"android" => Ok(DeviceType::Android),
			"ios" => Ok(DeviceType::Ios),
			other => Err(SyncError::InvalidInput {
				message: format!("unknown device type: {}", other),
			}),
		}
	}
}

impl fmt::Display for DeviceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			DeviceType::Windows => "windows",
			DeviceType::Linux => "linux",
			DeviceType::Macos => "macos",
			DeviceType::Android => "android",
			DeviceType::Ios => "ios",
		};
		write!(f, "{}", s)
	}
}

/// A registered device. The plaintext tokens are never stored; only their
/// argon2 digests are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
	pub id: String,
	pub user_id: String,
	pub device_name: String,
	pub device_type: DeviceType,
	pub os_version: String,
	pub client_version: String,

	/// Argon2 digest of the access token
	pub token_hash: String,

	/// Argon2 digest of the refresh token
	pub refresh_hash: String,

	pub created_at: DateTime<Utc>,

	/// Access token expiry
	pub expires_at: DateTime<Utc>,

	/// Refresh token expiry; rotation pushes this forward
	pub refresh_expires_at: DateTime<Utc>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub revoked_at: Option<DateTime<Utc>>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_sync_at: Option<DateTime<Utc>>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_seen_at: Option<DateTime<Utc>>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_ip: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_user_agent: Option<String>,

	pub scopes: Vec<String>,
	pub sync_count: u64,
	pub bytes_synced: u64,
}

impl Device {
	pub fn is_revoked(&self) -> bool {
		self.revoked_at.is_some()
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expires_at <= now
	}
}

/// Device registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
	pub device_name: String,
	pub device_type: String,
	#[serde(default)]
	pub os_version: String,
	#[serde(default)]
	pub client_version: String,
	#[serde(default)]
	pub scopes: Vec<String>,
}

/// Result of a registration or token refresh. The only time plaintext
/// tokens exist outside the client.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
	pub device_id: String,
	pub access_token: String,
	pub refresh_token: String,
	pub expires_at: DateTime<Utc>,
}

struct CacheEntry {
	device_id: String,
	inserted_at: Instant,
}

struct Inner {
	devices: RwLock<BTreeMap<String, Device>>,
	// Distinct mutex from the devices store: validation never blocks writes
	cache: Mutex<HashMap<String, CacheEntry>>,
	path: PathBuf,
	access_ttl: Duration,
	refresh_ttl: Duration,
	device_limit: usize,
	cache_ttl: std::time::Duration,
}

/// Registers devices, issues and rotates tokens, validates and revokes.
///
/// Cloning is cheap and shares the registry and cache.
pub struct DeviceManager {
	inner: Arc<Inner>,
}

impl Clone for DeviceManager {
	fn clone(&self) -> Self {
		DeviceManager { inner: self.inner.clone() }
	}
}

impl DeviceManager {
	pub fn new(
		data_root: &Path,
		access_ttl_days: i64,
		refresh_ttl_days: i64,
		device_limit: usize,
		cache_ttl_secs: u64,
	) -> Self {
		DeviceManager {
			inner: Arc::new(Inner {
				devices: RwLock::new(BTreeMap::new()),
				cache: Mutex::new(HashMap::new()),
				path: data_root.join("devices.json"),
				access_ttl: Duration::days(access_ttl_days),
				refresh_ttl: Duration::days(refresh_ttl_days),
				device_limit,
				cache_ttl: std::time::Duration::from_secs(cache_ttl_secs),
			}),
		}
	}

	/// Load the persisted device registry.
	pub async fn load(&self) -> Result<()> {
		if let Some(devices) = store::load_json(&self.inner.path).await? {
			*self.inner.devices.write().await = devices;
		}
		Ok(())
	}

	/// Register a new device for a user and issue its first token pair.
	pub async fn register_device(&self, user_id: &str, req: &RegisterRequest) -> Result<IssuedTokens> {
		if user_id.is_empty() {
			return Err(SyncError::MissingField { field: "user_id" });
		}
		let name_len = req.device_name.chars().count();
		if name_len == 0 || name_len > 64 {
			return Err(SyncError::InvalidInput {
				message: "device name must be between 1 and 64 characters".to_string(),
			});
		}
		let device_type = DeviceType::from_str(&req.device_type)?;

		let access_token = generate_token(ACCESS_TOKEN_PREFIX);
		let refresh_token = generate_token(REFRESH_TOKEN_PREFIX);
		let token_hash = hash_token(&access_token)?;
		let refresh_hash = hash_token(&refresh_token)?;

		let now = util::now();
		let device = Device {
			id: uuid::Uuid::new_v4().to_string(),
			user_id: user_id.to_string(),
			device_name: req.device_name.clone(),
			device_type,
			os_version: req.os_version.clone(),
			client_version: req.client_version.clone(),
			token_hash,
			refresh_hash,
			created_at: now,
			expires_at: now + self.inner.access_ttl,
			refresh_expires_at: now + self.inner.refresh_ttl,
			revoked_at: None,
			last_sync_at: None,
			last_seen_at: None,
			last_ip: None,
			last_user_agent: None,
			scopes: req.scopes.clone(),
			sync_count: 0,
			bytes_synced: 0,
		};

		let mut devices = self.inner.devices.write().await;
		let live = devices.values().filter(|d| d.user_id == user_id && !d.is_revoked()).count();
		if live >= self.inner.device_limit {
			return Err(SyncError::DeviceLimit { limit: self.inner.device_limit });
		}

		let mut next = devices.clone();
		next.insert(device.id.clone(), device.clone());
		self.persist(&next).await?;
		*devices = next;

		info!("registered device {} ({}) for user {}", device.id, device.device_type, user_id);
		Ok(IssuedTokens {
			device_id: device.id,
			access_token,
			refresh_token,
			expires_at: device.expires_at,
		})
	}

	/// Validate an access token and return the owning device.
	///
	/// Unknown device and wrong token are indistinguishable on the wire:
	/// both surface `token.invalid`.
	pub async fn validate_access_token(
		&self,
		token: &str,
		ip: Option<&str>,
		user_agent: Option<&str>,
	) -> Result<Device> {
		check_token_format(token, ACCESS_TOKEN_PREFIX)?;
		let cache_key = sha256_hex(token);

		// Fast path: cache hit, still re-verified with the slow digest to
		// guard against cache poisoning.
		if let Some(device_id) = self.cache_lookup(&cache_key) {
			let candidate = self.inner.devices.read().await.get(&device_id).cloned();
			if let Some(device) = candidate {
				if verify_token_slow(token, &device.token_hash).await? {
					let device = self.check_usable(device)?;
					self.touch_async(device.id.clone(), ip, user_agent);
					return Ok(device);
				}
			}
			// Stale or poisoned entry; fall through to the scan
			self.cache_remove(&cache_key);
		}

		// Slow path: scan the registry
		let candidates: Vec<(String, String)> = {
			let devices = self.inner.devices.read().await;
			devices.values().map(|d| (d.id.clone(), d.token_hash.clone())).collect()
		};
		for (device_id, token_hash) in candidates {
			if verify_token_slow(token, &token_hash).await? {
				let device = self
					.inner
					.devices
					.read()
					.await
					.get(&device_id)
					.cloned()
					.ok_or(SyncError::TokenInvalid)?;
				let device = self.check_usable(device)?;
				self.cache_insert(cache_key, device.id.clone());
				self.touch_async(device.id.clone(), ip, user_agent);
				return Ok(device);
			}
		}

		Err(SyncError::TokenInvalid)
	}

	/// Rotate a refresh token into a fresh access+refresh pair.
	///
	/// Refresh tokens are single use: the presented token stops working the
	/// moment the rotation persists.
	pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<IssuedTokens> {
		check_token_format(refresh_token, REFRESH_TOKEN_PREFIX)?;

		let candidates: Vec<(String, String)> = {
			let devices = self.inner.devices.read().await;
			devices.values().map(|d| (d.id.clone(), d.refresh_hash.clone())).collect()
		};

		let mut matched = None;
		for (device_id, refresh_hash) in candidates {
			if verify_token_slow(refresh_token, &refresh_hash).await? {
				matched = Some(device_id);
				break;
			}
		}
		let device_id = matched.ok_or(SyncError::TokenInvalid)?;

		let access_token = generate_token(ACCESS_TOKEN_PREFIX);
		let new_refresh_token = generate_token(REFRESH_TOKEN_PREFIX);
		let token_hash = hash_token(&access_token)?;
		let refresh_hash = hash_token(&new_refresh_token)?;

		let mut devices = self.inner.devices.write().await;
		let now = util::now();
		{
			let device = devices.get(&device_id).ok_or(SyncError::TokenInvalid)?;
			if device.is_revoked() {
				return Err(SyncError::DeviceRevoked);
			}
			if device.refresh_expires_at <= now {
				return Err(SyncError::TokenExpired);
			}
		}

		let mut next = devices.clone();
		let expires_at;
		{
			let device = next.get_mut(&device_id).expect("device exists");
			device.token_hash = token_hash;
			device.refresh_hash = refresh_hash;
			device.expires_at = now + self.inner.access_ttl;
			device.refresh_expires_at = now + self.inner.refresh_ttl;
			expires_at = device.expires_at;
		}
		self.persist(&next).await?;
		*devices = next;

		// The old access token may still sit in the cache; evict it
		self.cache_remove_device(&device_id);

		debug!("rotated tokens for device {}", device_id);
		Ok(IssuedTokens {
			device_id,
			access_token,
			refresh_token: new_refresh_token,
			expires_at,
		})
	}

	/// Soft-delete a device. Only the owning user may revoke.
	pub async fn revoke_device(&self, device_id: &str, user_id: &str) -> Result<()> {
		let mut devices = self.inner.devices.write().await;
		{
			let device = devices
				.get(device_id)
				.ok_or_else(|| SyncError::DeviceNotFound { device_id: device_id.to_string() })?;
			if device.user_id != user_id {
				return Err(SyncError::DeviceUnauthorized);
			}
		}

		let mut next = devices.clone();
		next.get_mut(device_id).expect("device exists").revoked_at = Some(util::now());
		self.persist(&next).await?;
		*devices = next;

		self.cache_remove_device(device_id);
		info!("revoked device {} for user {}", device_id, user_id);
		Ok(())
	}

	/// Revoke every live device of a user. Returns how many were revoked.
	pub async fn revoke_all_devices(&self, user_id: &str) -> Result<usize> {
		let mut devices = self.inner.devices.write().await;
		let targets: Vec<String> = devices
			.values()
			.filter(|d| d.user_id == user_id && !d.is_revoked())
			.map(|d| d.id.clone())
			.collect();
		if targets.is_empty() {
			return Ok(0);
		}

		let mut next = devices.clone();
		let now = util::now();
		for id in &targets {
			next.get_mut(id).expect("device exists").revoked_at = Some(now);
		}
		self.persist(&next).await?;
		*devices = next;

		for id in &targets {
			self.cache_remove_device(id);
		}
		info!("revoked {} devices for user {}", targets.len(), user_id);
		Ok(targets.len())
	}

	/// Account a completed sync against a device.
	pub async fn record_sync(&self, device_id: &str, bytes_transferred: u64) -> Result<()> {
		let mut devices = self.inner.devices.write().await;
		if !devices.contains_key(device_id) {
			return Err(SyncError::DeviceNotFound { device_id: device_id.to_string() });
		}

		let mut next = devices.clone();
		{
			let device = next.get_mut(device_id).expect("device exists");
			let now = util::now();
			device.sync_count += 1;
			device.bytes_synced += bytes_transferred;
			device.last_sync_at = Some(now);
			device.last_seen_at = Some(now);
		}
		self.persist(&next).await?;
		*devices = next;
		Ok(())
	}

	/// Fetch a device; only the owning user may see it.
	pub async fn get_device(&self, device_id: &str, user_id: &str) -> Result<Device> {
		let devices = self.inner.devices.read().await;
		let device = devices
			.get(device_id)
			.ok_or_else(|| SyncError::DeviceNotFound { device_id: device_id.to_string() })?;
		if device.user_id != user_id {
			return Err(SyncError::DeviceUnauthorized);
		}
		Ok(device.clone())
	}

	/// Every device of a user, revoked ones included until they purge.
	pub async fn list_devices(&self, user_id: &str) -> Vec<Device> {
		self.inner
			.devices
			.read()
			.await
			.values()
			.filter(|d| d.user_id == user_id)
			.cloned()
			.collect()
	}

	/// Drop devices past their audit retention: revoked more than
	/// `retention` ago, or with an expired refresh window (the device can
	/// never authenticate again). Returns how many were purged.
	pub async fn purge_expired(&self, retention: Duration) -> Result<usize> {
		let now = util::now();
		let mut devices = self.inner.devices.write().await;
		let mut next = devices.clone();
		let before = next.len();
		next.retain(|_, d| {
			let audit_done = d.revoked_at.map(|t| t + retention <= now).unwrap_or(false);
			let unusable = d.refresh_expires_at <= now;
			!(audit_done || unusable)
		});
		let removed = before - next.len();
		if removed > 0 {
			self.persist(&next).await?;
			*devices = next;
			info!("purged {} expired devices", removed);
		}
		Ok(removed)
	}

	/// Drop validation cache entries past their TTL.
	pub fn cleanup_cache(&self) -> usize {
		let mut cache = self.inner.cache.lock().expect("cache lock poisoned");
		let before = cache.len();
		let ttl = self.inner.cache_ttl;
		cache.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
		before - cache.len()
	}

	fn check_usable(&self, device: Device) -> Result<Device> {
		if device.is_revoked() {
			return Err(SyncError::DeviceRevoked);
		}
		if device.is_expired(util::now()) {
			return Err(SyncError::TokenExpired);
		}
		Ok(device)
	}

	fn cache_lookup(&self, key: &str) -> Option<String> {
		let cache = self.inner.cache.lock().expect("cache lock poisoned");
		cache
			.get(key)
			.filter(|entry| entry.inserted_at.elapsed() < self.inner.cache_ttl)
			.map(|entry| entry.device_id.clone())
	}

	fn cache_insert(&self, key: String, device_id: String) {
		let mut cache = self.inner.cache.lock().expect("cache lock poisoned");
		cache.insert(key, CacheEntry { device_id, inserted_at: Instant::now() });
	}

	fn cache_remove(&self, key: &str) {
		self.inner.cache.lock().expect("cache lock poisoned").remove(key);
	}

	fn cache_remove_device(&self, device_id: &str) {
		let mut cache = self.inner.cache.lock().expect("cache lock poisoned");
		cache.retain(|_, entry| entry.device_id != device_id);
	}

	/// Update last-seen bookkeeping off the request path. Failures are
	/// logged, never surfaced to the validation caller.
	fn touch_async(&self, device_id: String, ip: Option<&str>, user_agent: Option<&str>) {
		let inner = self.inner.clone();
		let ip = ip.map(String::from);
		let user_agent = user_agent.map(String::from);
		tokio::spawn(async move {
			let mut devices = inner.devices.write().await;
			let mut next = devices.clone();
			match next.get_mut(&device_id) {
				Some(device) => {
					device.last_seen_at = Some(util::now());
					if ip.is_some() {
						device.last_ip = ip;
					}
					if user_agent.is_some() {
						device.last_user_agent = user_agent;
					}
				}
				None => return,
			}
			let persisted = store::with_lock(&inner.path, || async {
				store::save_json(&inner.path, &next, store::MODE_SECRET).await
			})
			.await;
			match persisted {
				Ok(()) => *devices = next,
				Err(e) => warn!("last-seen update for {} not persisted: {}", device_id, e),
			}
		});
	}

	async fn persist(&self, snapshot: &BTreeMap<String, Device>) -> Result<()> {
		store::with_lock(&self.inner.path, || async {
			store::save_json(&self.inner.path, snapshot, store::MODE_SECRET).await
		})
		.await
	}
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// A missing header is `auth.missing`; anything but a single Bearer
/// credential is `auth.invalid`.
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
	let header = header.ok_or(SyncError::AuthMissing)?;
	let mut parts = header.splitn(2, ' ');
	match (parts.next(), parts.next()) {
		(Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
			Ok(token.trim())
		}
		_ => Err(SyncError::AuthInvalid { message: "expected a Bearer credential".to_string() }),
	}
}

/// `<prefix>` + unpadded URL-safe base64 over 32 bytes of OS randomness.
fn generate_token(prefix: &str) -> String {
	use base64::engine::general_purpose::URL_SAFE_NO_PAD;
	use base64::Engine as _;

	let mut bytes = [0u8; 32];
	OsRng.fill_bytes(&mut bytes);
	format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(bytes))
}

/// Prefix and length are validated before any digest work happens.
fn check_token_format(token: &str, prefix: &str) -> Result<()> {
	if !token.starts_with(prefix) || token.len() != prefix.len() + TOKEN_BODY_LEN {
		return Err(SyncError::TokenInvalidFormat);
	}
	let body = &token.as_bytes()[prefix.len()..];
	if !body.iter().all(|&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
		return Err(SyncError::TokenInvalidFormat);
	}
	Ok(())
}

fn sha256_hex(token: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(token.as_bytes());
	hex::encode(hasher.finalize())
}

fn hash_token(token: &str) -> Result<String> {
	let salt = SaltString::generate(&mut OsRng);
	Argon2::default()
		.hash_password(token.as_bytes(), &salt)
		.map(|hash| hash.to_string())
		.map_err(|e| SyncError::Internal { message: format!("token digest: {}", e) })
}

fn verify_token(token: &str, stored_hash: &str) -> bool {
	match PasswordHash::new(stored_hash) {
		Ok(parsed) => Argon2::default().verify_password(token.as_bytes(), &parsed).is_ok(),
		Err(_) => false,
	}
}

/// Deliberately slow digest verification, off the async threads and under
/// a soft timeout.
async fn verify_token_slow(token: &str, stored_hash: &str) -> Result<bool> {
	let token = token.to_string();
	let stored_hash = stored_hash.to_string();
	let handle = tokio::task::spawn_blocking(move || verify_token(&token, &stored_hash));
	match tokio::time::timeout(VERIFY_TIMEOUT, handle).await {
		Ok(Ok(matched)) => Ok(matched),
		Ok(Err(e)) => Err(SyncError::Internal { message: format!("digest task failed: {}", e) }),
		Err(_) => Err(SyncError::Internal { message: "digest verification timed out".to_string() }),
	}
}


// vim: ts=4
