//! Key derivation, storage-key namespacing, and the path normalizer (C1,
//! spec §4.1/§3).

use url::Url;

/// Default key derivation: the URL's pathname. Callers may supply their own
/// function with the same signature to override this.
pub fn derive(url: &Url) -> String {
    url.path().to_string()
}

/// Collapses consecutive slashes and strips a trailing slash (except for
/// the root `/`). Opt-in: exposed as a plain function a caller can pass as
/// its `cacheKey` function, not applied implicitly by `derive`. Defends
/// against web-cache-deception via path confusion (`//admin` vs `/admin`).
pub fn normalize(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        collapsed.push(ch);
    }

    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }

    if collapsed.is_empty() {
        "/".to_string()
    } else {
        collapsed
    }
}

const PAGE_PREFIX: &str = "page:";
const LOCK_PREFIX: &str = "lock:";

/// `pageKey(key)`: prefixes with `page:`, substituting a hashed path when
/// the result would exceed `storage_key_budget` bytes.
pub fn page_key(key: &str, storage_key_budget: usize) -> String {
    storage_key(PAGE_PREFIX, key, storage_key_budget)
}

/// `lockKey(key)`: prefixes with `lock:`, same budget rule as `page_key`.
pub fn lock_key(key: &str, storage_key_budget: usize) -> String {
    storage_key(LOCK_PREFIX, key, storage_key_budget)
}

fn storage_key(prefix: &str, key: &str, storage_key_budget: usize) -> String {
    let full = format!("{prefix}{key}");
    if full.len() <= storage_key_budget {
        return full;
    }
    format!("{prefix}hash:{}", dual_hash_hex(key))
}

/// Combined djb2 ⊕ FNV-1a 64-bit hash (each half 32-bit, concatenated) of a
/// path, rendered as lowercase hex (§3). Using two independent 32-bit
/// hashes concatenated avoids the birthday-bound collision risk of relying
/// on either alone at this string-key cardinality.
pub fn dual_hash_hex(input: &str) -> String {
    let djb2 = djb2_32(input);
    let fnv1a = fnv1a_32(input);
    format!("{:08x}{:08x}", djb2, fnv1a)
}

fn djb2_32(input: &str) -> u32 {
    let mut hash: u32 = 5381;
    for byte in input.as_bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(*byte as u32);
    }
    hash
}

fn fnv1a_32(input: &str) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
