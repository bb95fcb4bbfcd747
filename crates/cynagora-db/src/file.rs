// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The persistent backend: a names file and a rules file under a data
//! directory, each prefixed by a magic header. A transaction backs up
//! both files via hard link before mutating the in-memory mirror;
//! `Cancel` reloads the mirror from that backup rather than undoing
//! individual edits.

use crate::backend::{Action, Backend, BackendError, Transaction};
use crate::intern::Idx;
use crate::key::{Key, RawKey, RawValue, Value};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const MAGIC_LEN: usize = 40;
const MAGIC_TAG: &[u8] = b"cynagora-rules-store-v1";
/// Fraction of unreferenced names past which [`FileBackend::gc`]
/// rewrites the names file.
const GC_THRESHOLD: f64 = 0.20;

fn magic_header() -> [u8; MAGIC_LEN] {
    let mut buf = [0u8; MAGIC_LEN];
    buf[..MAGIC_TAG.len()].copy_from_slice(MAGIC_TAG);
    buf
}

/// Persistent (`mem`/`file`-pair) backend for rules whose session is
/// `WIDE` or `ANY`.
pub struct FileBackend {
    names_path: PathBuf,
    rules_path: PathBuf,
    names: Vec<String>,
    /// Indices into `names`, sorted by string value — the dichotomic
    /// search permutation; insertion into `names` stays append-only.
    sorted: Vec<Idx>,
    rules: Vec<(Key, Value)>,
    in_transaction: bool,
}

impl FileBackend {
    /// Open (creating if absent) the names/rules file pair under `dir`.
    pub fn open(dir: &Path) -> Result<Self, BackendError> {
        fs::create_dir_all(dir)?;
        let names_path = dir.join("cynagora.names");
        let rules_path = dir.join("cynagora.rules");
        let mut backend = Self {
            names_path,
            rules_path,
            names: Vec::new(),
            sorted: Vec::new(),
            rules: Vec::new(),
            in_transaction: false,
        };
        if backend.names_path.exists() || backend.rules_path.exists() {
            backend.load()?;
        } else {
            backend.write_files(&backend.names_path.clone(), &backend.rules_path.clone())?;
        }
        Ok(backend)
    }

    fn backup_paths(&self) -> (PathBuf, PathBuf) {
        (with_tilde(&self.names_path), with_tilde(&self.rules_path))
    }

    fn load(&mut self) -> Result<(), BackendError> {
        let (names, sorted) = read_names(&self.names_path)?;
        let rules = read_rules(&self.rules_path)?;
        self.names = names;
        self.sorted = sorted;
        self.rules = rules;
        Ok(())
    }

    fn write_files(&self, names_path: &Path, rules_path: &Path) -> Result<(), BackendError> {
        write_names(names_path, &self.names)?;
        write_rules(rules_path, &self.rules)?;
        Ok(())
    }

    fn find(&self, name: &str) -> Option<Idx> {
        self.sorted
            .binary_search_by(|&idx| self.names[idx as usize].as_str().cmp(name))
            .ok()
            .map(|pos| self.sorted[pos])
    }

    fn insert_new(&mut self, name: &str) -> Idx {
        let new_idx = self.names.len() as Idx;
        self.names.push(name.to_string());
        let pos = self
            .sorted
            .binary_search_by(|&idx| self.names[idx as usize].as_str().cmp(name))
            .unwrap_or_else(|p| p);
        self.sorted.insert(pos, new_idx);
        new_idx
    }

    /// Load a human-edited initial rule file (one rule per line:
    /// `client session user permission value expire`, `#`-comments and
    /// blank lines skipped, whitespace-insensitive fields), used when
    /// the store is empty or `--force-init` was requested. Duplicate
    /// keys are last-wins. `expire` is expiration text (a relative
    /// duration like `1h30m`, `forever`/`*`, or a leading `-` for "do
    /// not cache"), resolved against `now` the same way a `set` command
    /// over the admin socket would be.
    pub fn import_initial(&mut self, path: &Path, now: i64) -> Result<usize, BackendError> {
        let text = fs::read_to_string(path)?;
        let mut count = 0;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                continue;
            }
            let raw_key = RawKey::new(fields[0], fields[1], fields[2], fields[3]);
            let raw_value = RawValue {
                value: fields[4].to_string(),
                expire: cynagora_proto::txt2exp(fields[5], now, true)?,
            };
            self.set_raw(&raw_key, &raw_value)?;
            count += 1;
        }
        self.sync()?;
        Ok(count)
    }

    fn set_raw(&mut self, raw_key: &RawKey, raw_value: &RawValue) -> Result<(), BackendError> {
        let key = Key {
            client: self.intern(raw_key.client.as_deref().unwrap_or("*"), true)?,
            session: self.intern(raw_key.session.as_deref().unwrap_or("*"), true)?,
            user: self.intern(raw_key.user.as_deref().unwrap_or("*"), true)?,
            permission: self.intern(raw_key.permission.as_deref().unwrap_or("*"), true)?,
        };
        let value = Value {
            value: self.intern(&raw_value.value, true)?,
            expire: raw_value.expire,
        };
        if let Some(slot) = self.rules.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.rules.push((key, value));
        }
        Ok(())
    }

    /// Whether every name is referenced by some rule or the rule's
    /// value — used to decide whether [`Backend::gc`] should rewrite.
    fn unreferenced_fraction(&self) -> f64 {
        if self.names.is_empty() {
            return 0.0;
        }
        let mut used = vec![false; self.names.len()];
        for (key, value) in &self.rules {
            for idx in [key.client, key.session, key.user, key.permission, value.value] {
                if (idx as usize) < used.len() {
                    used[idx as usize] = true;
                }
            }
        }
        let unused = used.iter().filter(|u| !**u).count();
        unused as f64 / self.names.len() as f64
    }
}

impl Backend for FileBackend {
    fn intern(&mut self, name: &str, create: bool) -> Result<Idx, BackendError> {
        if let Some(idx) = self.find(name) {
            return Ok(idx);
        }
        if !create {
            return Err(BackendError::NotFound);
        }
        Ok(self.insert_new(name))
    }

    fn string_of(&self, idx: Idx) -> &str {
        &self.names[idx as usize]
    }

    fn apply(&mut self, visitor: &mut dyn FnMut(&Key, &mut Value) -> Action) {
        let mut i = 0;
        while i < self.rules.len() {
            let (key, value) = &mut self.rules[i];
            let key = *key;
            let action = visitor(&key, value);
            match action {
                Action::Continue => {}
                Action::Stop => break,
                Action::UpdateAndContinue => {}
                Action::UpdateAndStop => break,
                Action::RemoveAndContinue => {
                    self.rules.remove(i);
                    continue;
                }
                Action::RemoveAndStop => {
                    self.rules.remove(i);
                    break;
                }
            }
            i += 1;
        }
    }

    fn add(&mut self, key: Key, value: Value) -> Result<(), BackendError> {
        self.rules.push((key, value));
        Ok(())
    }

    fn transaction(&mut self, op: Transaction) -> Result<(), BackendError> {
        match op {
            Transaction::Start => {
                if self.in_transaction {
                    return Err(BackendError::NoTransaction);
                }
                let (names_backup, rules_backup) = self.backup_paths();
                let _ = fs::remove_file(&names_backup);
                let _ = fs::remove_file(&rules_backup);
                fs::hard_link(&self.names_path, &names_backup)?;
                fs::hard_link(&self.rules_path, &rules_backup)?;
                self.in_transaction = true;
            }
            Transaction::Commit => {
                if !self.in_transaction {
                    return Err(BackendError::NoTransaction);
                }
                let names_path = self.names_path.clone();
                let rules_path = self.rules_path.clone();
                self.write_files(&names_path, &rules_path)?;
                let (names_backup, rules_backup) = self.backup_paths();
                let _ = fs::remove_file(names_backup);
                let _ = fs::remove_file(rules_backup);
                self.in_transaction = false;
            }
            Transaction::Cancel => {
                if !self.in_transaction {
                    return Err(BackendError::NoTransaction);
                }
                let (names_backup, rules_backup) = self.backup_paths();
                let (names, sorted) = read_names(&names_backup)?;
                let rules = read_rules(&rules_backup)?;
                self.names = names;
                self.sorted = sorted;
                self.rules = rules;
                let _ = fs::remove_file(names_backup);
                let _ = fs::remove_file(rules_backup);
                self.in_transaction = false;
            }
        }
        Ok(())
    }

    fn gc(&mut self) {
        if self.unreferenced_fraction() <= GC_THRESHOLD {
            return;
        }
        debug!(names_before = self.names.len(), "rewriting name arena past gc threshold");
        let mut remap = vec![Idx::MAX; self.names.len()];
        let mut new_names = Vec::new();
        let names_snapshot = self.names.clone();
        let mut new_rules = Vec::with_capacity(self.rules.len());
        for (key, value) in &self.rules {
            let new_key = Key {
                client: remap_name(&mut remap, &mut new_names, key.client, &names_snapshot),
                session: remap_name(&mut remap, &mut new_names, key.session, &names_snapshot),
                user: remap_name(&mut remap, &mut new_names, key.user, &names_snapshot),
                permission: remap_name(&mut remap, &mut new_names, key.permission, &names_snapshot),
            };
            let new_value = Value {
                value: remap_name(&mut remap, &mut new_names, value.value, &names_snapshot),
                expire: value.expire,
            };
            new_rules.push((new_key, new_value));
        }
        self.names = new_names;
        self.rules = new_rules;
        self.sorted = (0..self.names.len() as Idx).collect();
        self.sorted.sort_by(|&a, &b| self.names[a as usize].cmp(&self.names[b as usize]));
    }

    fn sync(&mut self) -> Result<(), BackendError> {
        let names_path = self.names_path.clone();
        let rules_path = self.rules_path.clone();
        self.write_files(&names_path, &rules_path)
    }
}

fn remap_name(remap: &mut [Idx], new_names: &mut Vec<String>, old: Idx, names: &[String]) -> Idx {
    if remap[old as usize] == Idx::MAX {
        remap[old as usize] = new_names.len() as Idx;
        new_names.push(names[old as usize].clone());
    }
    remap[old as usize]
}

fn with_tilde(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push("~");
    PathBuf::from(s)
}

fn write_names(path: &Path, names: &[String]) -> Result<(), BackendError> {
    let mut file = fs::File::create(path)?;
    file.write_all(&magic_header())?;
    for name in names {
        file.write_all(name.as_bytes())?;
        file.write_all(&[0u8])?;
    }
    Ok(())
}

fn read_names(path: &Path) -> Result<(Vec<String>, Vec<Idx>), BackendError> {
    let mut file = fs::File::open(path)?;
    let mut magic = [0u8; MAGIC_LEN];
    file.read_exact(&mut magic)?;
    if magic[..MAGIC_TAG.len()] != *MAGIC_TAG {
        return Err(BackendError::BadMagic(path.display().to_string()));
    }
    let mut rest = Vec::new();
    file.read_to_end(&mut rest)?;
    let names: Vec<String> = rest
        .split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();
    let mut sorted: Vec<Idx> = (0..names.len() as Idx).collect();
    sorted.sort_by(|&a, &b| names[a as usize].cmp(&names[b as usize]));
    Ok((names, sorted))
}

fn write_rules(path: &Path, rules: &[(Key, Value)]) -> Result<(), BackendError> {
    let mut file = fs::File::create(path)?;
    file.write_all(&magic_header())?;
    for (key, value) in rules {
        file.write_all(&key.client.to_le_bytes())?;
        file.write_all(&key.session.to_le_bytes())?;
        file.write_all(&key.user.to_le_bytes())?;
        file.write_all(&key.permission.to_le_bytes())?;
        file.write_all(&value.value.to_le_bytes())?;
        file.write_all(&value.expire.to_le_bytes())?;
    }
    Ok(())
}

const RECORD_LEN: usize = 4 * 5 + 8;

#[allow(clippy::unwrap_used)] // chunks_exact(RECORD_LEN) guarantees each slice's length
fn read_rules(path: &Path) -> Result<Vec<(Key, Value)>, BackendError> {
    let mut file = fs::File::open(path)?;
    let mut magic = [0u8; MAGIC_LEN];
    file.read_exact(&mut magic)?;
    if magic[..MAGIC_TAG.len()] != *MAGIC_TAG {
        return Err(BackendError::BadMagic(path.display().to_string()));
    }
    let mut rest = Vec::new();
    file.read_to_end(&mut rest)?;
    let mut rules = Vec::with_capacity(rest.len() / RECORD_LEN);
    for chunk in rest.chunks_exact(RECORD_LEN) {
        let client = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
        let session = u32::from_le_bytes(chunk[4..8].try_into().unwrap());
        let user = u32::from_le_bytes(chunk[8..12].try_into().unwrap());
        let permission = u32::from_le_bytes(chunk[12..16].try_into().unwrap());
        let value = u32::from_le_bytes(chunk[16..20].try_into().unwrap());
        let expire = i64::from_le_bytes(chunk[20..28].try_into().unwrap());
        rules.push((
            Key {
                client,
                session,
                user,
                permission,
            },
            Value { value, expire },
        ));
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_and_reloads_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut db = FileBackend::open(dir.path()).unwrap();
            let k = Key {
                client: db.intern("alice", true).unwrap(),
                session: db.intern("*", true).unwrap(),
                user: db.intern("1000", true).unwrap(),
                permission: db.intern("audio", true).unwrap(),
            };
            let v = Value {
                value: db.intern("yes", true).unwrap(),
                expire: 0,
            };
            db.add(k, v).unwrap();
            db.sync().unwrap();
        }
        let db = FileBackend::open(dir.path()).unwrap();
        assert_eq!(db.rules.len(), 1);
        assert_eq!(db.string_of(db.rules[0].0.client), "alice");
    }

    #[test]
    fn cancel_restores_backup_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = FileBackend::open(dir.path()).unwrap();
        let k = Key {
            client: db.intern("alice", true).unwrap(),
            session: db.intern("*", true).unwrap(),
            user: db.intern("1000", true).unwrap(),
            permission: db.intern("audio", true).unwrap(),
        };
        let v = Value {
            value: db.intern("yes", true).unwrap(),
            expire: 0,
        };
        db.add(k, v).unwrap();
        db.sync().unwrap();

        db.transaction(Transaction::Start).unwrap();
        db.add(
            k,
            Value {
                value: db.intern("no", true).unwrap(),
                expire: 0,
            },
        )
        .unwrap();
        assert_eq!(db.rules.len(), 2);
        db.transaction(Transaction::Cancel).unwrap();
        assert_eq!(db.rules.len(), 1);
    }

    #[test]
    fn commit_persists_mirror_and_clears_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = FileBackend::open(dir.path()).unwrap();
        db.transaction(Transaction::Start).unwrap();
        let k = Key {
            client: db.intern("alice", true).unwrap(),
            session: db.intern("*", true).unwrap(),
            user: db.intern("1000", true).unwrap(),
            permission: db.intern("audio", true).unwrap(),
        };
        db.add(
            k,
            Value {
                value: db.intern("yes", true).unwrap(),
                expire: 0,
            },
        )
        .unwrap();
        db.transaction(Transaction::Commit).unwrap();

        let reopened = FileBackend::open(dir.path()).unwrap();
        assert_eq!(reopened.rules.len(), 1);
    }

    #[test]
    fn rejects_mismatched_magic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cynagora.names"), b"not-a-real-header-padding-.....").unwrap();
        fs::write(dir.path().join("cynagora.rules"), b"not-a-real-header-padding-.....").unwrap();
        assert!(matches!(
            FileBackend::open(dir.path()),
            Err(BackendError::BadMagic(_))
        ));
    }

    #[test]
    fn imports_initial_rule_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = FileBackend::open(dir.path()).unwrap();
        let init = dir.path().join("init.rules");
        fs::write(
            &init,
            "# comment\nalice * 1000 audio yes 0\n\nbob * 1000 video no 0 # trailing\n",
        )
        .unwrap();
        let count = db.import_initial(&init, 100).unwrap();
        assert_eq!(count, 2);
        assert_eq!(db.rules.len(), 2);
    }

    #[test]
    fn dichotomic_lookup_finds_inserted_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = FileBackend::open(dir.path()).unwrap();
        let names = ["zeta", "alpha", "mike", "bravo"];
        let idxs: Vec<Idx> = names.iter().map(|n| db.intern(n, true).unwrap()).collect();
        for (name, idx) in names.iter().zip(idxs) {
            assert_eq!(db.find(name), Some(idx));
        }
        assert_eq!(db.find("missing"), None);
    }
}
