//! Association tables described as data, so one set of queries serves every
//! direction of every relationship.

use zonetrail_core::{EntityClass, IpVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation {
    /// Key under which counts are cached in `association_counts`.
    pub name: &'static str,
    pub table: &'static str,
    pub key_col: &'static str,
    pub peer_col: &'static str,
    pub peer_table: &'static str,
    pub peer_name_col: &'static str,
    pub key_class: EntityClass,
    pub peer_class: EntityClass,
}

impl Relation {
    pub const DOMAIN_NAMESERVERS: Relation = Relation {
        name: "domain_nameservers",
        table: "domains_nameservers",
        key_col: "domain_id",
        peer_col: "nameserver_id",
        peer_table: "nameservers",
        peer_name_col: "domain",
        key_class: EntityClass::Domain,
        peer_class: EntityClass::NameServer,
    };

    pub const NAMESERVER_DOMAINS: Relation = Relation {
        name: "nameserver_domains",
        table: "domains_nameservers",
        key_col: "nameserver_id",
        peer_col: "domain_id",
        peer_table: "domains",
        peer_name_col: "domain",
        key_class: EntityClass::NameServer,
        peer_class: EntityClass::Domain,
    };

    pub const ZONE_NAMESERVERS: Relation = Relation {
        name: "zone_nameservers",
        table: "zones_nameservers",
        key_col: "zone_id",
        peer_col: "nameserver_id",
        peer_table: "nameservers",
        peer_name_col: "domain",
        key_class: EntityClass::Zone,
        peer_class: EntityClass::NameServer,
    };

    pub const NAMESERVER_ZONES: Relation = Relation {
        name: "nameserver_zones",
        table: "zones_nameservers",
        key_col: "nameserver_id",
        peer_col: "zone_id",
        peer_table: "zones",
        peer_name_col: "zone",
        key_class: EntityClass::NameServer,
        peer_class: EntityClass::Zone,
    };

    pub const NAMESERVER_A: Relation = Relation {
        name: "nameserver_a",
        table: "a_nameservers",
        key_col: "nameserver_id",
        peer_col: "a_id",
        peer_table: "a",
        peer_name_col: "ip",
        key_class: EntityClass::NameServer,
        peer_class: EntityClass::Address,
    };

    pub const NAMESERVER_AAAA: Relation = Relation {
        name: "nameserver_aaaa",
        table: "aaaa_nameservers",
        key_col: "nameserver_id",
        peer_col: "aaaa_id",
        peer_table: "aaaa",
        peer_name_col: "ip",
        key_class: EntityClass::NameServer,
        peer_class: EntityClass::Address,
    };

    pub const A_NAMESERVERS: Relation = Relation {
        name: "a_nameservers",
        table: "a_nameservers",
        key_col: "a_id",
        peer_col: "nameserver_id",
        peer_table: "nameservers",
        peer_name_col: "domain",
        key_class: EntityClass::Address,
        peer_class: EntityClass::NameServer,
    };

    pub const AAAA_NAMESERVERS: Relation = Relation {
        name: "aaaa_nameservers",
        table: "aaaa_nameservers",
        key_col: "aaaa_id",
        peer_col: "nameserver_id",
        peer_table: "nameservers",
        peer_name_col: "domain",
        key_class: EntityClass::Address,
        peer_class: EntityClass::NameServer,
    };

    pub const ALL: [Relation; 8] = [
        Relation::DOMAIN_NAMESERVERS,
        Relation::NAMESERVER_DOMAINS,
        Relation::ZONE_NAMESERVERS,
        Relation::NAMESERVER_ZONES,
        Relation::NAMESERVER_A,
        Relation::NAMESERVER_AAAA,
        Relation::A_NAMESERVERS,
        Relation::AAAA_NAMESERVERS,
    ];

    pub fn nameserver_addresses(version: IpVersion) -> Relation {
        match version {
            IpVersion::V4 => Relation::NAMESERVER_A,
            IpVersion::V6 => Relation::NAMESERVER_AAAA,
        }
    }

    pub fn address_nameservers(version: IpVersion) -> Relation {
        match version {
            IpVersion::V4 => Relation::A_NAMESERVERS,
            IpVersion::V6 => Relation::AAAA_NAMESERVERS,
        }
    }

    /// The relation read from the other end.
    pub fn reverse(self) -> Relation {
        Relation::ALL
            .into_iter()
            .find(|r| r.table == self.table && r.key_col == self.peer_col)
            .unwrap_or(self)
    }
}

/// Glue tables by IP family, for queries that work on raw address rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlueTable {
    pub version: IpVersion,
    pub table: &'static str,
    pub addr_table: &'static str,
    pub addr_col: &'static str,
}

impl GlueTable {
    pub const A: GlueTable = GlueTable { version: IpVersion::V4, table: "a_nameservers", addr_table: "a", addr_col: "a_id" };
    pub const AAAA: GlueTable = GlueTable { version: IpVersion::V6, table: "aaaa_nameservers", addr_table: "aaaa", addr_col: "aaaa_id" };
    pub const ALL: [GlueTable; 2] = [GlueTable::A, GlueTable::AAAA];

    pub fn for_version(version: IpVersion) -> GlueTable {
        match version {
            IpVersion::V4 => GlueTable::A,
            IpVersion::V6 => GlueTable::AAAA,
        }
    }
}
