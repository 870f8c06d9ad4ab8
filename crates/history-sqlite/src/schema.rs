pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE zones (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  zone            TEXT NOT NULL UNIQUE
);

CREATE TABLE domains (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  domain          TEXT NOT NULL UNIQUE,
  zone_id         INTEGER NOT NULL REFERENCES zones(id)
);

CREATE TABLE nameservers (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  domain          TEXT NOT NULL UNIQUE
);

CREATE TABLE a (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  ip              TEXT NOT NULL UNIQUE,
  ip_key          BLOB NOT NULL UNIQUE CHECK (length(ip_key) = 4)
);

CREATE TABLE aaaa (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  ip              TEXT NOT NULL UNIQUE,
  ip_key          BLOB NOT NULL UNIQUE CHECK (length(ip_key) = 16)
);

CREATE TABLE domains_nameservers (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  domain_id       INTEGER NOT NULL REFERENCES domains(id),
  nameserver_id   INTEGER NOT NULL REFERENCES nameservers(id),
  zone_id         INTEGER NOT NULL REFERENCES zones(id),
  first_seen      TEXT NOT NULL,
  last_seen       TEXT,
  CHECK (last_seen IS NULL OR first_seen <= last_seen)
);

CREATE TABLE zones_nameservers (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  zone_id         INTEGER NOT NULL REFERENCES zones(id),
  nameserver_id   INTEGER NOT NULL REFERENCES nameservers(id),
  first_seen      TEXT NOT NULL,
  last_seen       TEXT,
  CHECK (last_seen IS NULL OR first_seen <= last_seen)
);

CREATE TABLE a_nameservers (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  a_id            INTEGER NOT NULL REFERENCES a(id),
  nameserver_id   INTEGER NOT NULL REFERENCES nameservers(id),
  zone_id         INTEGER NOT NULL REFERENCES zones(id),
  first_seen      TEXT NOT NULL,
  last_seen       TEXT,
  CHECK (last_seen IS NULL OR first_seen <= last_seen)
);

CREATE TABLE aaaa_nameservers (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  aaaa_id         INTEGER NOT NULL REFERENCES aaaa(id),
  nameserver_id   INTEGER NOT NULL REFERENCES nameservers(id),
  zone_id         INTEGER NOT NULL REFERENCES zones(id),
  first_seen      TEXT NOT NULL,
  last_seen       TEXT,
  CHECK (last_seen IS NULL OR first_seen <= last_seen)
);

CREATE TABLE imports (
  id                  INTEGER PRIMARY KEY AUTOINCREMENT,
  zone_id             INTEGER NOT NULL REFERENCES zones(id),
  date                TEXT NOT NULL,
  imported            INTEGER NOT NULL CHECK (imported IN (0,1)) DEFAULT 0,
  diffed              INTEGER NOT NULL CHECK (diffed IN (0,1)) DEFAULT 0,
  domains             INTEGER,
  records             INTEGER,
  feed_old            INTEGER,
  feed_moved          INTEGER,
  feed_new            INTEGER,
  diff_duration_ms    INTEGER,
  import_duration_ms  INTEGER,
  UNIQUE (zone_id, date)
);

CREATE TABLE association_counts (
  relation        TEXT NOT NULL,
  entity_id       INTEGER NOT NULL,
  active          INTEGER NOT NULL,
  archived        INTEGER NOT NULL,
  PRIMARY KEY (relation, entity_id)
);

-- at most one open window per pair
CREATE UNIQUE INDEX uq_dns_open ON domains_nameservers(domain_id, nameserver_id) WHERE last_seen IS NULL;
CREATE UNIQUE INDEX uq_zns_open ON zones_nameservers(zone_id, nameserver_id) WHERE last_seen IS NULL;
CREATE UNIQUE INDEX uq_ans_open ON a_nameservers(a_id, nameserver_id) WHERE last_seen IS NULL;
CREATE UNIQUE INDEX uq_aaaans_open ON aaaa_nameservers(aaaa_id, nameserver_id) WHERE last_seen IS NULL;

CREATE INDEX idx_domains_zone ON domains(zone_id);
CREATE INDEX idx_dns_domain ON domains_nameservers(domain_id, first_seen);
CREATE INDEX idx_dns_ns ON domains_nameservers(nameserver_id, last_seen);
CREATE INDEX idx_dns_zone ON domains_nameservers(zone_id, last_seen);
CREATE INDEX idx_dns_first ON domains_nameservers(first_seen);
CREATE INDEX idx_dns_last ON domains_nameservers(last_seen);
CREATE INDEX idx_zns_zone ON zones_nameservers(zone_id, last_seen);
CREATE INDEX idx_zns_ns ON zones_nameservers(nameserver_id, last_seen);
CREATE INDEX idx_ans_ns ON a_nameservers(nameserver_id, first_seen);
CREATE INDEX idx_ans_ip ON a_nameservers(a_id, last_seen);
CREATE INDEX idx_ans_first ON a_nameservers(first_seen);
CREATE INDEX idx_ans_last ON a_nameservers(last_seen);
CREATE INDEX idx_aaaans_ns ON aaaa_nameservers(nameserver_id, first_seen);
CREATE INDEX idx_aaaans_ip ON aaaa_nameservers(aaaa_id, last_seen);
CREATE INDEX idx_aaaans_first ON aaaa_nameservers(first_seen);
CREATE INDEX idx_aaaans_last ON aaaa_nameservers(last_seen);
CREATE INDEX idx_imports_date ON imports(date, imported);

COMMIT;
"#;
