//! Entry points for the service layer: normalize what a human typed, resolve
//! it, and assemble entity views from the store and the engines.
//!
//! Views are built from several independent reads without a surrounding
//! transaction; a concurrent import may be visible to some parts and not others.

use aggregates::{Aggregates, Bucket, BucketCounts, Scope, ZoneHistory, ZoneLifecycle};
use availability::{Availability, Available, Registered};
use feeds::{ChangeKind, Feed, FeedClass, FeedConfig, FeedEngine, SearchSeries};
use history_sqlite::{
    ActiveAddress, Associated, DomainSample, ImportBacklog, KnownAddress, NameServerRank, Relation, Store,
    ZoneImportSummary, ZoneShare,
};
use ipnet::IpNet;
use rand::Rng;
use serde::Serialize;
use time::Date;
use tracing::{debug, info};
use zonetrail_core::date::parse_date;
use zonetrail_core::names::{normalize_name, parse_ip};
use zonetrail_core::{EntityClass, HistoryError, IpVersion, QueryCtx, Result, TransientKind, Validity};

#[derive(Debug, Clone, Copy)]
pub struct LookupConfig {
    /// Draws `random_active_domain` makes before giving up.
    pub random_attempts: usize,
    /// Domains listed on a zone view.
    pub zone_sample: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        LookupConfig { random_attempts: 64, zone_sample: 50 }
    }
}

/// Which peer lists a view should carry. Counts are always filled in.
#[derive(Debug, Clone, Copy)]
pub struct ViewOptions {
    pub active: bool,
    pub archived: bool,
    /// Skip the archived list when more rows than this exist.
    pub archived_fetch_limit: Option<i64>,
}

impl Default for ViewOptions {
    fn default() -> Self {
        ViewOptions { active: true, archived: true, archived_fetch_limit: None }
    }
}

impl ViewOptions {
    pub fn counts_only() -> Self {
        ViewOptions { active: false, archived: false, archived_fetch_limit: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peers {
    pub active_count: i64,
    pub archived_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<Vec<Associated>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<Vec<Associated>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainView {
    pub domain: String,
    pub zone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Validity>,
    pub nameservers: Peers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_import: Option<ZoneImportSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameServerView {
    pub nameserver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Validity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glue_zone: Option<String>,
    pub domains: Peers,
    pub zones: Peers,
    pub ipv4: Peers,
    pub ipv6: Peers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneView {
    pub zone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Validity>,
    pub nameservers: Peers,
    pub domains: Vec<DomainSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import: Option<ZoneImportSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_import: Option<ZoneImportSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressView {
    pub ip: String,
    pub version: IpVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Validity>,
    pub nameservers: Peers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub matches: Vec<EntityClass>,
}

#[derive(Clone)]
pub struct Lookup {
    store: Store,
    feeds: FeedEngine,
    aggregates: Aggregates,
    availability: Availability,
    config: LookupConfig,
}

impl Lookup {
    pub fn new(store: Store, config: LookupConfig, feed_config: FeedConfig) -> Self {
        Lookup {
            feeds: FeedEngine::new(store.clone(), feed_config),
            aggregates: Aggregates::new(store.clone()),
            availability: Availability::new(store.clone()),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    async fn peers(&self, ctx: &QueryCtx, rel: Relation, id: i64, opts: ViewOptions) -> Result<Peers> {
        let (active_count, archived_count) = tokio::try_join!(
            self.store.count_associated(ctx, rel, id, true),
            self.store.count_associated(ctx, rel, id, false),
        )?;
        let active = if opts.active { Some(self.store.list_associated(ctx, rel, id, true).await?) } else { None };
        let wanted = opts.archived && opts.archived_fetch_limit.map_or(true, |max| archived_count <= max);
        let archived = if wanted { Some(self.store.list_associated(ctx, rel, id, false).await?) } else { None };
        Ok(Peers { active_count, archived_count, active, archived })
    }

    pub async fn domain(&self, ctx: &QueryCtx, name: &str, opts: ViewOptions) -> Result<DomainView> {
        let domain = required_name(name)?;
        let Some((id, zone_id)) = self.store.resolve_domain(ctx, &domain).await? else {
            return Err(HistoryError::not_found(EntityClass::Domain, domain));
        };
        let zone = self
            .store
            .zone_name(ctx, zone_id)
            .await?
            .ok_or_else(|| HistoryError::Fatal(format!("domain {domain} references missing zone {zone_id}")))?;
        let life = self.store.lifetime(ctx, Relation::DOMAIN_NAMESERVERS, id).await?;
        let nameservers = self.peers(ctx, Relation::DOMAIN_NAMESERVERS, id, opts).await?;
        let zone_import = self.store.zone_import(ctx, zone_id).await?;
        Ok(DomainView { domain, zone, first_seen: life.first_seen, last_seen: life.last_seen, nameservers, zone_import })
    }

    pub async fn nameserver(&self, ctx: &QueryCtx, name: &str, opts: ViewOptions) -> Result<NameServerView> {
        let nameserver = required_name(name)?;
        let Some(id) = self.store.resolve_nameserver(ctx, &nameserver).await? else {
            return Err(HistoryError::not_found(EntityClass::NameServer, nameserver));
        };
        // a nameserver may be known only through glue, or only through delegations
        let (domains_life, v4_life, v6_life) = tokio::try_join!(
            self.store.lifetime(ctx, Relation::NAMESERVER_DOMAINS, id),
            self.store.lifetime(ctx, Relation::nameserver_addresses(IpVersion::V4), id),
            self.store.lifetime(ctx, Relation::nameserver_addresses(IpVersion::V6), id),
        )?;
        let life = domains_life.merge(v4_life).merge(v6_life);
        let glue_zone = self.store.glue_zone(ctx, id).await?.map(|z| z.name);
        let domains = self.peers(ctx, Relation::NAMESERVER_DOMAINS, id, opts).await?;
        let zones = self.peers(ctx, Relation::NAMESERVER_ZONES, id, opts).await?;
        let ipv4 = self.peers(ctx, Relation::nameserver_addresses(IpVersion::V4), id, opts).await?;
        let ipv6 = self.peers(ctx, Relation::nameserver_addresses(IpVersion::V6), id, opts).await?;
        Ok(NameServerView {
            nameserver,
            first_seen: life.first_seen,
            last_seen: life.last_seen,
            glue_zone,
            domains,
            zones,
            ipv4,
            ipv6,
        })
    }

    pub async fn zone(&self, ctx: &QueryCtx, name: &str, opts: ViewOptions) -> Result<ZoneView> {
        let zone = normalize_name(name)?;
        let Some(id) = self.store.resolve_zone(ctx, &zone).await? else {
            return Err(HistoryError::not_found(EntityClass::Zone, zone));
        };
        let life = self.store.lifetime(ctx, Relation::ZONE_NAMESERVERS, id).await?;
        let nameservers = self.peers(ctx, Relation::ZONE_NAMESERVERS, id, opts).await?;
        let domains = self.store.sample_domains_in_zone(ctx, id, self.config.zone_sample).await?;
        let (import, root_import) = tokio::try_join!(self.store.zone_import(ctx, id), self.store.root_import(ctx))?;
        Ok(ZoneView { zone, first_seen: life.first_seen, last_seen: life.last_seen, nameservers, domains, import, root_import })
    }

    pub async fn address(&self, ctx: &QueryCtx, input: &str, opts: ViewOptions) -> Result<AddressView> {
        let ip = parse_ip(input)?;
        let Some(id) = self.store.resolve_address(ctx, &ip).await? else {
            return Err(HistoryError::not_found(EntityClass::Address, ip.text()));
        };
        let rel = Relation::address_nameservers(ip.version);
        let life = self.store.lifetime(ctx, rel, id).await?;
        let nameservers = self.peers(ctx, rel, id, opts).await?;
        Ok(AddressView { ip: ip.text(), version: ip.version, first_seen: life.first_seen, last_seen: life.last_seen, nameservers })
    }

    /// A domain drawn uniformly from the id space, redrawn until one with an
    /// open nameserver window turns up. Gives up after the configured number of draws.
    pub async fn random_active_domain(&self, ctx: &QueryCtx) -> Result<String> {
        let Some(max) = self.store.max_domain_id(ctx).await? else {
            return Err(HistoryError::not_found(EntityClass::Domain, "*"));
        };
        for attempt in 1..=self.config.random_attempts {
            let id = rand::thread_rng().gen_range(1..=max);
            if let Some(name) = self.store.active_domain(ctx, id).await? {
                debug!(attempt, id, "random active domain");
                return Ok(name);
            }
        }
        info!(attempts = self.config.random_attempts, "no active domain drawn");
        Err(HistoryError::transient(
            TransientKind::Exhausted,
            format!("no active domain after {} draws", self.config.random_attempts),
        ))
    }

    pub async fn top_nameservers(&self, ctx: &QueryCtx, limit: usize) -> Result<Vec<NameServerRank>> {
        self.store.top_nameservers(ctx, limit).await
    }

    /// Entity classes under which a name (or address) is known.
    pub async fn search(&self, ctx: &QueryCtx, input: &str) -> Result<SearchResult> {
        let ip = parse_ip(input).ok();
        let name = match &ip {
            Some(ip) => ip.text(),
            None => normalize_name(input)?,
        };
        let matches = self.store.search(ctx, &name, ip.as_ref()).await?;
        Ok(SearchResult { query: name, matches })
    }

    pub async fn feed(&self, ctx: &QueryCtx, date: &str, kind: ChangeKind, class: FeedClass) -> Result<Vec<Feed>> {
        let date = parse_date(date)?;
        self.feeds.feed(ctx, date, kind, class).await
    }

    pub async fn feed_search(&self, ctx: &QueryCtx, kind: ChangeKind, class: FeedClass, term: &str) -> Result<Vec<SearchSeries>> {
        self.feeds.feed_search(ctx, kind, class, term).await
    }

    /// History of one zone, or of everything when `zone` is `None`.
    pub async fn history(&self, ctx: &QueryCtx, zone: Option<&str>, bucket: Bucket, limit: usize) -> Result<Vec<BucketCounts>> {
        let scope = match zone {
            None => Scope::All,
            Some(name) => {
                let zone = normalize_name(name)?;
                match self.store.resolve_zone(ctx, &zone).await? {
                    Some(id) => Scope::Zone(id),
                    None => return Err(HistoryError::not_found(EntityClass::Zone, zone)),
                }
            }
        };
        self.aggregates.history(ctx, scope, bucket, limit).await
    }

    pub async fn history_by_zone(&self, ctx: &QueryCtx, bucket: Bucket, limit: usize) -> Result<Vec<ZoneHistory>> {
        self.aggregates.history_by_zone(ctx, bucket, limit).await
    }

    pub async fn zone_lifecycles(&self, ctx: &QueryCtx) -> Result<Vec<ZoneLifecycle>> {
        self.aggregates.zone_lifecycles(ctx).await
    }

    pub async fn registered(&self, ctx: &QueryCtx, prefix: &str) -> Result<Vec<Registered>> {
        self.availability.registered(ctx, prefix).await
    }

    pub async fn available(&self, ctx: &QueryCtx, prefix: &str) -> Result<Vec<Available>> {
        self.availability.available(ctx, prefix).await
    }

    pub async fn zone_imports(&self, ctx: &QueryCtx) -> Result<Vec<ZoneImportSummary>> {
        self.store.zone_imports(ctx).await
    }

    pub async fn import_backlog(&self, ctx: &QueryCtx, days: usize) -> Result<ImportBacklog> {
        self.store.import_backlog(ctx, days).await
    }

    pub async fn active_addresses(&self, ctx: &QueryCtx, date: &str, limit: usize) -> Result<Vec<ActiveAddress>> {
        let date = parse_date(date)?;
        self.store.active_addresses(ctx, date, limit).await
    }

    pub async fn address_zone_share(&self, ctx: &QueryCtx, input: &str) -> Result<Vec<ZoneShare>> {
        let ip = parse_ip(input)?;
        if self.store.resolve_address(ctx, &ip).await?.is_none() {
            return Err(HistoryError::not_found(EntityClass::Address, ip.text()));
        }
        self.store.address_zone_share(ctx, &ip).await
    }

    pub async fn addresses_in_prefix(&self, ctx: &QueryCtx, cidr: &str, limit: usize) -> Result<Vec<KnownAddress>> {
        let net: IpNet = cidr
            .trim()
            .parse()
            .map_err(|e| HistoryError::validation(format!("invalid CIDR block {cidr:?}: {e}")))?;
        self.store.addresses_in_prefix(ctx, net.trunc(), limit).await
    }
}

fn required_name(input: &str) -> Result<String> {
    let name = normalize_name(input)?;
    if name.is_empty() {
        return Err(HistoryError::validation("name must not be empty"));
    }
    Ok(name)
}
