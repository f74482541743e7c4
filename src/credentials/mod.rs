use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

use crate::Result;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// One cookie from a Netscape-format jar
#[derive(Clone, PartialEq, Eq)]
pub struct CookieEntry {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// Unix expiry; 0 marks a session cookie
    pub expiry_epoch: i64,
    pub name: String,
    pub value: String,
}

impl CookieEntry {
    pub fn is_session(&self) -> bool {
        self.expiry_epoch == 0
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_session() && self.expiry_epoch <= now.timestamp()
    }

    /// Whether this cookie would be sent to `host`
    pub fn matches_host(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let domain = domain.to_ascii_lowercase();

        host == domain
            || ((self.include_subdomains || self.domain.starts_with('.'))
                && host.ends_with(&format!(".{}", domain)))
    }

    /// Parse one jar line; `None` for comments, blanks and malformed lines
    fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let line = line.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(line);
        if line.trim().is_empty() || line.starts_with('#') {
            return None;
        }

        let fields: Vec<&str> = line.splitn(7, '\t').collect();
        if fields.len() != 7 {
            return None;
        }

        let expiry_epoch = fields[4]
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| fields[4].trim().parse::<f64>().ok().map(|f| f as i64))?;
        let name = fields[5].trim();
        if fields[0].trim().is_empty() || name.is_empty() {
            return None;
        }

        Some(Self {
            domain: fields[0].trim().to_string(),
            include_subdomains: parse_flag(fields[1])?,
            path: fields[2].trim().to_string(),
            secure: parse_flag(fields[3])?,
            expiry_epoch,
            name: name.to_string(),
            value: fields[6].to_string(),
        })
    }

    fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            flag(self.include_subdomains),
            self.path,
            flag(self.secure),
            self.expiry_epoch,
            self.name,
            self.value
        )
    }
}

impl fmt::Debug for CookieEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieEntry")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expiry_epoch", &self.expiry_epoch)
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "TRUE" => Some(true),
        "FALSE" => Some(false),
        _ => None,
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// An exported browser session
#[derive(Debug, Clone)]
pub struct CredentialSet {
    pub entries: Vec<CookieEntry>,
    pub captured_at: DateTime<Utc>,
    /// Lines that were neither comments nor valid cookies
    pub skipped_lines: usize,
    pub source: Option<PathBuf>,
}

impl CredentialSet {
    pub fn new(entries: Vec<CookieEntry>, captured_at: DateTime<Utc>) -> Self {
        Self {
            entries,
            captured_at,
            skipped_lines: 0,
            source: None,
        }
    }

    /// Parse jar text; malformed lines are counted and skipped, never fatal
    pub fn parse(text: &str, captured_at: DateTime<Utc>) -> Self {
        let mut entries = Vec::new();
        let mut skipped_lines = 0;

        for line in text.lines() {
            let trimmed = line.trim();
            let is_comment = trimmed.starts_with('#') && !trimmed.starts_with(HTTP_ONLY_PREFIX);
            if trimmed.is_empty() || is_comment {
                continue;
            }
            match CookieEntry::parse_line(line) {
                Some(entry) => entries.push(entry),
                None => skipped_lines += 1,
            }
        }

        if skipped_lines > 0 {
            tracing::warn!("Skipped {} malformed cookie jar lines", skipped_lines);
        }

        Self {
            entries,
            captured_at,
            skipped_lines,
            source: None,
        }
    }

    /// Load a jar file; the capture time is the file's modification time
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs_err::read_to_string(path).context("Failed to read cookie jar")?;
        let modified = fs_err::metadata(path)
            .context("Failed to stat cookie jar")?
            .modified()
            .context("Cookie jar has no modification time")?;

        let mut set = Self::parse(&text, DateTime::<Utc>::from(modified));
        set.source = Some(path.to_path_buf());
        tracing::debug!(
            "Loaded {} cookies from {} (captured {})",
            set.entries.len(),
            path.display(),
            set.captured_at
        );
        Ok(set)
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.captured_at).max(Duration::zero())
    }

    /// Share of persistent entries whose own expiry has passed.
    ///
    /// Session cookies are left out of both sides of the ratio.
    pub fn expired_fraction_at(&self, now: DateTime<Utc>) -> f64 {
        let persistent = self.entries.iter().filter(|e| !e.is_session()).count();
        if persistent == 0 {
            return 0.0;
        }
        let expired = self.entries.iter().filter(|e| e.is_expired_at(now)).count();
        expired as f64 / persistent as f64
    }

    /// The entries still usable at `class`; a stale jar keeps only its session cookies
    pub fn usable_entries(&self, class: Freshness) -> impl Iterator<Item = &CookieEntry> {
        self.entries
            .iter()
            .filter(move |e| class != Freshness::Stale || e.is_session())
    }

    /// This set narrowed to what `class` allows; `None` when nothing is left
    pub fn restricted_to(self: &Arc<Self>, class: Freshness) -> Option<Arc<Self>> {
        match class {
            Freshness::Expired => None,
            Freshness::Stale => {
                let entries: Vec<CookieEntry> = self.usable_entries(class).cloned().collect();
                if entries.is_empty() {
                    return None;
                }
                Some(Arc::new(Self {
                    entries,
                    captured_at: self.captured_at,
                    skipped_lines: self.skipped_lines,
                    source: self.source.clone(),
                }))
            }
            Freshness::Fresh | Freshness::Aging => Some(Arc::clone(self)),
        }
    }

    /// `Cookie` header value for requests to `host`
    pub fn cookie_header(&self, host: &str, now: DateTime<Utc>) -> Option<String> {
        let pairs: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired_at(now) && e.matches_host(host))
            .map(|e| format!("{}={}", e.name, e.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Render the unexpired entries back to Netscape format
    pub fn to_netscape(&self, now: DateTime<Utc>) -> String {
        let mut out = String::from("# Netscape HTTP Cookie File\n");
        for entry in self.entries.iter().filter(|e| !e.is_expired_at(now)) {
            out.push_str(&entry.to_line());
            out.push('\n');
        }
        out
    }

    /// Write a private jar snapshot for an external tool; removed on drop
    pub fn write_snapshot(&self, now: DateTime<Utc>) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("transcriptor-cookies-")
            .suffix(".txt")
            .tempfile()
            .context("Failed to create cookie snapshot")?;
        file.write_all(self.to_netscape(now).as_bytes())
            .context("Failed to write cookie snapshot")?;
        file.flush()?;
        Ok(file)
    }
}

/// Age class of a credential set, freshest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Aging,
    Stale,
    Expired,
}

impl Freshness {
    /// Usable when at least as fresh as `min`; expired sets never are
    pub fn satisfies(&self, min: Freshness) -> bool {
        *self != Freshness::Expired && *self <= min
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Freshness::Fresh => "fresh",
            Freshness::Aging => "aging",
            Freshness::Stale => "stale",
            Freshness::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Age thresholds for classification
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    pub fresh_within: Duration,
    pub aging_within: Duration,
    pub stale_within: Duration,
    /// Above this share of past-expiry entries the set is expired regardless of age
    pub max_expired_fraction: f64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            fresh_within: Duration::hours(6),
            aging_within: Duration::hours(24),
            stale_within: Duration::hours(48),
            max_expired_fraction: 0.5,
        }
    }
}

impl FreshnessPolicy {
    pub fn classify(&self, set: &CredentialSet, now: DateTime<Utc>) -> Freshness {
        if set.entries.is_empty() || set.expired_fraction_at(now) > self.max_expired_fraction {
            return Freshness::Expired;
        }

        let age = set.age_at(now);
        if age < self.fresh_within {
            Freshness::Fresh
        } else if age < self.aging_within {
            Freshness::Aging
        } else if age <= self.stale_within {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

/// Read-mostly holder of the current credential set.
///
/// Reloads swap the whole set under a write lock, so readers see either the
/// old or the new set, never a mix.
pub struct CredentialManager {
    policy: FreshnessPolicy,
    current: RwLock<Option<Arc<CredentialSet>>>,
}

impl CredentialManager {
    pub fn new(policy: FreshnessPolicy) -> Self {
        Self {
            policy,
            current: RwLock::new(None),
        }
    }

    pub fn with_set(policy: FreshnessPolicy, set: CredentialSet) -> Self {
        Self {
            policy,
            current: RwLock::new(Some(Arc::new(set))),
        }
    }

    /// Load from `path` if given; a missing path yields a manager without credentials
    pub fn from_path(policy: FreshnessPolicy, path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::with_set(policy, CredentialSet::load(path)?)),
            None => Ok(Self::new(policy)),
        }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> Option<Arc<CredentialSet>> {
        self.current.read().clone()
    }

    pub fn replace(&self, set: CredentialSet) {
        *self.current.write() = Some(Arc::new(set));
    }

    /// Parse the new jar fully before swapping it in
    pub fn reload_from(&self, path: &Path) -> Result<()> {
        let set = CredentialSet::load(path)?;
        tracing::info!("Reloaded {} cookies from {}", set.entries.len(), path.display());
        self.replace(set);
        Ok(())
    }

    pub fn classify_at(&self, now: DateTime<Utc>) -> Freshness {
        match self.snapshot() {
            Some(set) => self.policy.classify(&set, now),
            None => Freshness::Expired,
        }
    }

    pub fn classify(&self) -> Freshness {
        self.classify_at(Utc::now())
    }

    pub fn is_usable(&self, min: Freshness) -> bool {
        self.classify().satisfies(min)
    }

    /// The usable part of the current set when it satisfies `min`, with its classification
    pub fn usable_snapshot(&self, min: Freshness) -> (Freshness, Option<Arc<CredentialSet>>) {
        self.usable_snapshot_at(min, Utc::now())
    }

    pub fn usable_snapshot_at(
        &self,
        min: Freshness,
        now: DateTime<Utc>,
    ) -> (Freshness, Option<Arc<CredentialSet>>) {
        match self.snapshot() {
            Some(set) => {
                let class = self.policy.classify(&set, now);
                let usable = if class.satisfies(min) {
                    set.restricted_to(class)
                } else {
                    None
                };
                (class, usable)
            }
            None => (Freshness::Expired, None),
        }
    }
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CredentialManager")
            .field("policy", &self.policy)
            .field("entries", &snapshot.as_ref().map(|s| s.entries.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAR: &str = "# Netscape HTTP Cookie File\n\
# comment line\n\
\n\
.youtube.com\tTRUE\t/\tTRUE\t1999999999\tSID\tabc123\n\
#HttpOnly_.youtube.com\tTRUE\t/\tTRUE\t0\tHSID\tsess\n\
broken line without tabs\n\
.youtube.com\tMAYBE\t/\tTRUE\t1999999999\tBAD\tflag\n\
.google.com\tTRUE\t/\tFALSE\tnot-a-number\tNID\tx\n\
accounts.google.com\tFALSE\t/\tTRUE\t1000\tOLD\tgone\n";

    fn set_aged(hours: i64) -> (CredentialSet, DateTime<Utc>) {
        let now = Utc::now();
        let set = CredentialSet::parse(
            ".youtube.com\tTRUE\t/\tTRUE\t0\tSID\tv\n",
            now - Duration::hours(hours),
        );
        (set, now)
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let set = CredentialSet::parse(JAR, Utc::now());
        let names: Vec<&str> = set.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["SID", "HSID", "OLD"]);
        assert_eq!(set.skipped_lines, 3);
        assert!(set.entries[1].is_session());
    }

    #[test]
    fn test_classification_by_age() {
        let policy = FreshnessPolicy::default();
        for (hours, expected) in [
            (5, Freshness::Fresh),
            (10, Freshness::Aging),
            (30, Freshness::Stale),
            (50, Freshness::Expired),
        ] {
            let (set, now) = set_aged(hours);
            assert_eq!(policy.classify(&set, now), expected, "age {}h", hours);
        }
    }

    #[test]
    fn test_mostly_expired_entries_classify_as_expired() {
        let text = ".youtube.com\tTRUE\t/\tTRUE\t1000\tA\t1\n\
.youtube.com\tTRUE\t/\tTRUE\t1000\tB\t2\n\
.youtube.com\tTRUE\t/\tTRUE\t0\tC\t3\n";
        let now = Utc::now();
        let set = CredentialSet::parse(text, now);
        assert!(set.expired_fraction_at(now) > 0.6);
        assert_eq!(FreshnessPolicy::default().classify(&set, now), Freshness::Expired);
    }

    #[test]
    fn test_session_cookies_do_not_dilute_expired_share() {
        let text = ".youtube.com\tTRUE\t/\tTRUE\t1000\tA\t1\n\
.youtube.com\tTRUE\t/\tTRUE\t0\tS1\t2\n\
.youtube.com\tTRUE\t/\tTRUE\t0\tS2\t3\n\
.youtube.com\tTRUE\t/\tTRUE\t0\tS3\t4\n";
        let now = Utc::now();
        let set = CredentialSet::parse(text, now);
        assert_eq!(set.expired_fraction_at(now), 1.0);
        assert_eq!(FreshnessPolicy::default().classify(&set, now), Freshness::Expired);

        let sessions_only = CredentialSet::parse(".youtube.com\tTRUE\t/\tTRUE\t0\tS\t1\n", now);
        assert_eq!(sessions_only.expired_fraction_at(now), 0.0);
    }

    #[test]
    fn test_stale_jar_only_hands_out_session_cookies() {
        let now = Utc::now();
        let text = ".youtube.com\tTRUE\t/\tTRUE\t0\tSESS\ts\n\
.youtube.com\tTRUE\t/\tTRUE\t4102444800\tPERSIST\tp\n";
        let manager = CredentialManager::with_set(
            FreshnessPolicy::default(),
            CredentialSet::parse(text, now - Duration::hours(30)),
        );

        let (class, usable) = manager.usable_snapshot_at(Freshness::Stale, now);
        assert_eq!(class, Freshness::Stale);
        let usable = usable.unwrap();
        assert_eq!(usable.cookie_header("www.youtube.com", now).as_deref(), Some("SESS=s"));
        let jar = usable.to_netscape(now);
        assert!(jar.contains("SESS"));
        assert!(!jar.contains("PERSIST"));

        let fresh = CredentialManager::with_set(
            FreshnessPolicy::default(),
            CredentialSet::parse(text, now - Duration::hours(1)),
        );
        let (_, usable) = fresh.usable_snapshot_at(Freshness::Stale, now);
        assert_eq!(
            usable.unwrap().cookie_header("www.youtube.com", now).as_deref(),
            Some("SESS=s; PERSIST=p")
        );
    }

    #[test]
    fn test_stale_jar_without_session_cookies_is_unusable() {
        let now = Utc::now();
        let manager = CredentialManager::with_set(
            FreshnessPolicy::default(),
            CredentialSet::parse(
                ".youtube.com\tTRUE\t/\tTRUE\t4102444800\tPERSIST\tp\n",
                now - Duration::hours(30),
            ),
        );
        let (class, usable) = manager.usable_snapshot_at(Freshness::Stale, now);
        assert_eq!(class, Freshness::Stale);
        assert!(usable.is_none());
    }

    #[test]
    fn test_empty_set_is_expired() {
        let set = CredentialSet::parse("# nothing here\n", Utc::now());
        assert_eq!(FreshnessPolicy::default().classify(&set, Utc::now()), Freshness::Expired);
    }

    #[test]
    fn test_satisfies() {
        assert!(Freshness::Fresh.satisfies(Freshness::Stale));
        assert!(Freshness::Stale.satisfies(Freshness::Stale));
        assert!(!Freshness::Stale.satisfies(Freshness::Aging));
        assert!(!Freshness::Expired.satisfies(Freshness::Expired));
    }

    #[test]
    fn test_cookie_header_filters_host_and_expiry() {
        let now = Utc::now();
        let set = CredentialSet::parse(JAR, now);
        let header = set.cookie_header("www.youtube.com", now).unwrap();
        assert_eq!(header, "SID=abc123; HSID=sess");
        assert!(set.cookie_header("accounts.google.com", now).is_none());
        assert!(set.cookie_header("example.com", now).is_none());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let now = Utc::now();
        let set = CredentialSet::parse(JAR, now);
        let file = set.write_snapshot(now).unwrap();
        let reloaded = CredentialSet::load(file.path()).unwrap();
        assert_eq!(reloaded.entries.len(), 2);
        assert_eq!(reloaded.skipped_lines, 0);
    }

    #[test]
    fn test_manager_swap_and_classify() {
        let manager = CredentialManager::new(FreshnessPolicy::default());
        assert_eq!(manager.classify(), Freshness::Expired);
        assert!(!manager.is_usable(Freshness::Stale));

        let (set, _) = set_aged(1);
        manager.replace(set);
        assert_eq!(manager.classify(), Freshness::Fresh);
        let (class, usable) = manager.usable_snapshot(Freshness::Aging);
        assert_eq!(class, Freshness::Fresh);
        assert!(usable.is_some());
    }

    #[test]
    fn test_reload_swaps_whole_set() {
        let manager = CredentialManager::with_set(
            FreshnessPolicy::default(),
            CredentialSet::parse(JAR, Utc::now()),
        );
        let before = manager.snapshot().unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b".youtube.com\tTRUE\t/\tTRUE\t0\tNEW\tv\n").unwrap();
        manager.reload_from(file.path()).unwrap();

        let after = manager.snapshot().unwrap();
        assert_eq!(before.entries.len(), 3);
        assert_eq!(after.entries.len(), 1);
        assert_eq!(after.source.as_deref(), Some(file.path()));

        assert!(manager.reload_from(Path::new("/nonexistent/jar.txt")).is_err());
        assert_eq!(manager.snapshot().unwrap().entries.len(), 1);
    }

    #[test]
    fn test_debug_redacts_values() {
        let set = CredentialSet::parse(JAR, Utc::now());
        let debug = format!("{:?}", set.entries[0]);
        assert!(!debug.contains("abc123"));
    }
}
