use std::collections::{BTreeMap, HashMap};

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::committees::apply::{ApplyReport, ContactIds, apply_diff};
use crate::committees::config::SyncConfig;
use crate::committees::context::SyncContext;
use crate::committees::crm::{CrmApi, Entity, Params, params};
use crate::committees::current::{
    crm_committee_name, extract_current_memberships, resolve_current_committees,
};
use crate::committees::diff::{MembershipDiff, diff_memberships};
use crate::committees::error::{Result, SyncError};
use crate::committees::model::{Address, CrmId, ExternalId, Person, Roster};
use crate::committees::roles::{role_mapping, warn_unmapped_roles};
use crate::committees::tools::lookup::{
    committee_subtype, option_value, require_id, resolve_organization,
};
use crate::committees::tools::{GroupMembership, IdTracker};

const PREFIX_OPTION_GROUP: &str = "individual_prefix";
const SUFFIX_OPTION_GROUP: &str = "individual_suffix";
const GENDER_OPTION_GROUP: &str = "gender";

/// What a synchronisation run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub committees_found: usize,
    pub committees_created: usize,
    pub persons_created: usize,
    pub persons_updated: usize,
    /// Persons skipped because their data was rejected.
    pub persons_failed: usize,
    pub details_created: usize,
    pub details_rejected: usize,
    pub current_memberships: usize,
    pub diff: MembershipDiff,
    pub applied: ApplyReport,
}

/// Pushes a [`Roster`] into the CRM.
///
/// Identity tracking and group membership are injected so they can be
/// replaced independently of the data API.
pub struct Syncer<'a> {
    api: &'a dyn CrmApi,
    tracker: &'a dyn IdTracker,
    groups: &'a dyn GroupMembership,
    config: &'a SyncConfig,
}

impl<'a> Syncer<'a> {
    pub fn new(
        api: &'a dyn CrmApi,
        tracker: &'a dyn IdTracker,
        groups: &'a dyn GroupMembership,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            api,
            tracker,
            groups,
            config,
        }
    }

    /// Pre-flight check, run before anything is written.
    pub fn check_requirements(&self) -> Result<()> {
        self.tracker.check_available()
    }

    /// Runs the full pipeline: shared definitions, committees, persons with
    /// their contact details, then the membership reconciliation.
    #[instrument(
        level = "info",
        skip_all,
        fields(
            committees = roster.committee_count(),
            persons = roster.person_count(),
            memberships = roster.memberships().len()
        )
    )]
    pub fn sync(&self, roster: &Roster, ctx: &mut SyncContext) -> Result<SyncReport> {
        self.check_requirements()?;
        self.tracker.ensure_type()?;

        let mut report = SyncReport::default();
        let group_id = self.lobby_group(ctx)?;
        let committees = self.sync_committees(roster, group_id, ctx, &mut report)?;
        let persons = self.sync_persons(roster, group_id, ctx, &mut report)?;

        let (diff, applied, current) = self.sync_memberships(roster, &committees, &persons, ctx)?;
        report.current_memberships = current;
        report.diff = diff;
        report.applied = applied;

        info!(
            committees_created = report.committees_created,
            persons_created = report.persons_created,
            persons_updated = report.persons_updated,
            deactivated = report.applied.deactivated,
            created = report.applied.created,
            "synchronisation complete"
        );
        Ok(report)
    }

    fn lobby_group(&self, ctx: &mut SyncContext) -> Result<CrmId> {
        let title = &self.config.contacts.group_title;
        if let Some(id) = ctx.groups.get(title) {
            return Ok(*id);
        }
        let id = self.groups.ensure_group(params(json!({"title": title})))?;
        ctx.groups.insert(title.clone(), id);
        Ok(id)
    }

    fn sync_committees(
        &self,
        roster: &Roster,
        group_id: CrmId,
        ctx: &mut SyncContext,
        report: &mut SyncReport,
    ) -> Result<BTreeMap<ExternalId, CrmId>> {
        info!("Syncing {} committees...", roster.committee_count());
        let subtype = committee_subtype(self.api, &self.config.contacts, ctx)?;

        let mut resolved = BTreeMap::new();
        for committee in roster.committees() {
            let name = crm_committee_name(committee, &self.config.contacts);
            let organization = resolve_organization(
                self.api,
                &name,
                params(json!({"contact_sub_type": subtype})),
                ctx,
            )?;
            if organization.created {
                self.groups.add_to_group(organization.id, group_id, true)?;
                info!(committee = %committee.id, %name, contact_id = organization.id, "committee created");
                report.committees_created += 1;
            } else {
                debug!(committee = %committee.id, %name, contact_id = organization.id, "committee identified");
                report.committees_found += 1;
            }
            resolved.insert(committee.id.clone(), organization.id);
        }
        Ok(resolved)
    }

    fn sync_persons(
        &self,
        roster: &Roster,
        group_id: CrmId,
        ctx: &mut SyncContext,
        report: &mut SyncReport,
    ) -> Result<HashMap<ExternalId, CrmId>> {
        info!("Syncing {} individuals...", roster.person_count());

        let mut contacts = HashMap::new();
        for person in roster.persons() {
            match self.sync_person(roster, person, group_id, ctx, report) {
                Ok(contact_id) => {
                    contacts.insert(person.id.clone(), contact_id);
                }
                Err(error) if error.is_entity_scoped() => {
                    warn!(person = %person.id, %error, "skipping person");
                    report.persons_failed += 1;
                }
                Err(error) => return Err(error),
            }
        }

        info!(
            created = report.persons_created,
            updated = report.persons_updated,
            "Syncing contacts complete"
        );
        Ok(contacts)
    }

    fn sync_person(
        &self,
        roster: &Roster,
        person: &Person,
        group_id: CrmId,
        ctx: &mut SyncContext,
        report: &mut SyncReport,
    ) -> Result<CrmId> {
        if person.last_name.is_empty() && person.first_name.is_empty() {
            return Err(SyncError::Validation {
                entity: "person",
                id: person.id.clone(),
                message: "person has no name".into(),
            });
        }

        let existing = self.tracker.lookup(&person.id)?;
        let mut contact = self.contact_params(person, ctx)?;
        if let Some(id) = existing {
            contact.insert("id".into(), Value::from(id));
        }

        let record = self.api.create(Entity::Contact, contact)?;
        let contact_id = require_id(Entity::Contact, &record)?;
        self.tracker.bind(&person.id, contact_id)?;
        match existing {
            Some(_) => {
                debug!(person = %person.id, contact_id, "contact updated");
                report.persons_updated += 1;
            }
            None => {
                info!(person = %person.id, name = %person.display_name(), contact_id, "contact created");
                report.persons_created += 1;
            }
        }

        self.groups.add_to_group(contact_id, group_id, true)?;
        self.sync_details(roster, &person.id, contact_id, ctx, report)?;
        Ok(contact_id)
    }

    fn contact_params(&self, person: &Person, ctx: &mut SyncContext) -> Result<Params> {
        let settings = &self.config.contacts;
        let mut contact = params(json!({
            "contact_type": "Individual",
            "first_name": person.first_name,
            "last_name": person.last_name,
            "source": settings.source,
        }));

        if let Some(prefix) = non_empty(&person.prefix) {
            let label = settings
                .prefix_aliases
                .get(prefix)
                .map_or(prefix, String::as_str);
            let value = option_value(self.api, PREFIX_OPTION_GROUP, label, ctx)?;
            contact.insert("prefix_id".into(), Value::from(value));
        }
        if let Some(title) = non_empty(&person.formal_title) {
            let value = option_value(self.api, SUFFIX_OPTION_GROUP, title, ctx)?;
            contact.insert("formal_title".into(), Value::from(title));
            contact.insert("suffix_id".into(), Value::from(value));
        }
        if let Some(gender) = non_empty(&person.gender) {
            let label = settings
                .gender_aliases
                .get(gender)
                .map_or(gender, String::as_str);
            let value = option_value(self.api, GENDER_OPTION_GROUP, label, ctx)?;
            contact.insert("gender_id".into(), Value::from(value));
        }
        Ok(contact)
    }

    /// Adds addresses, phones and emails unless an identical one is already
    /// attached to the contact. New addresses share the parliament's work
    /// address when there is one.
    fn sync_details(
        &self,
        roster: &Roster,
        person_id: &str,
        contact_id: CrmId,
        ctx: &mut SyncContext,
        report: &mut SyncReport,
    ) -> Result<()> {
        let master_id = match roster.addresses_of(person_id).next() {
            Some(_) => self.parliament_address(roster, ctx)?,
            None => None,
        };
        for address in roster.addresses_of(person_id) {
            let mut fields = params(json!({
                "contact_id": contact_id,
                "street_address": address.street_address,
                "postal_code": address.postal_code,
                "city": address.city,
            }));
            if let Some(supplement) = non_empty(&address.supplemental_address_1) {
                fields.insert("supplemental_address_1".into(), Value::from(supplement));
            }
            if self.create_detail(Entity::Address, fields, master_id)? {
                report.details_created += 1;
            }
        }

        for phone in roster.phones_of(person_id) {
            let fields = params(json!({"contact_id": contact_id, "phone": phone.phone}));
            if self.create_detail(Entity::Phone, fields, None)? {
                report.details_created += 1;
            }
        }

        for email in roster.emails_of(person_id) {
            if let Err(error) = email.validate() {
                if !error.is_entity_scoped() {
                    return Err(error);
                }
                warn!(person = %person_id, %error, "skipping email");
                report.details_rejected += 1;
                continue;
            }
            let fields = params(json!({"contact_id": contact_id, "email": email.email.trim()}));
            if self.create_detail(Entity::Email, fields, None)? {
                report.details_created += 1;
            }
        }
        Ok(())
    }

    fn create_detail(
        &self,
        entity: Entity,
        fields: Params,
        master_id: Option<CrmId>,
    ) -> Result<bool> {
        if self.api.get_count(entity, fields.clone())? > 0 {
            return Ok(false);
        }
        let mut create = fields;
        if let Some(master_id) = master_id {
            create.insert("master_id".into(), Value::from(master_id));
        }
        create.insert("location_type_id".into(), Value::from("Work"));
        create.insert("is_primary".into(), Value::from(1));
        if entity == Entity::Phone {
            create.insert("phone_type_id".into(), Value::from("Phone"));
        }
        self.api.create(entity, create)?;
        Ok(true)
    }

    /// Work address of the parliament organization, resolved or created once
    /// per run. `None` when no parliament name is configured or found.
    fn parliament_address(
        &self,
        roster: &Roster,
        ctx: &mut SyncContext,
    ) -> Result<Option<CrmId>> {
        if let Some(id) = ctx.parliament_address {
            return Ok(Some(id));
        }
        let configured = non_empty(&self.config.contacts.parliament_name);
        let Some(name) = configured.or_else(|| {
            roster
                .addresses()
                .iter()
                .find_map(|address| non_empty(&address.supplemental_address_1))
        }) else {
            return Ok(None);
        };

        let parliament = resolve_organization(self.api, name, Params::new(), ctx)?;
        if parliament.created {
            info!(parliament = name, contact_id = parliament.id, "parliament organization created");
        }

        let existing = self.api.get(
            Entity::Address,
            params(json!({
                "contact_id": parliament.id,
                "location_type_id": "Work",
                "is_primary": 1,
                "option.limit": 1,
            })),
        )?;
        let address_id = match existing.first() {
            Some(record) => require_id(Entity::Address, record)?,
            None => {
                let mut address = params(json!({
                    "contact_id": parliament.id,
                    "location_type_id": "Work",
                    "is_primary": 1,
                }));
                if let Some(template) = parliament_template(roster, name) {
                    address.insert("street_address".into(), json!(template.street_address));
                    address.insert("postal_code".into(), json!(template.postal_code));
                    address.insert("city".into(), json!(template.city));
                }
                let record = self.api.create(Entity::Address, address)?;
                info!(parliament = name, "added work address to parliament");
                require_id(Entity::Address, &record)?
            }
        };

        ctx.parliament_address = Some(address_id);
        Ok(Some(address_id))
    }

    fn sync_memberships(
        &self,
        roster: &Roster,
        committees: &BTreeMap<ExternalId, CrmId>,
        persons: &HashMap<ExternalId, CrmId>,
        ctx: &mut SyncContext,
    ) -> Result<(MembershipDiff, ApplyReport, usize)> {
        let imported = roster.memberships();
        info!("Syncing {} committee memberships...", imported.len());
        let dangling = roster.dangling_memberships().count();
        if dangling > 0 {
            warn!(dangling, "memberships refer to unknown persons or committees");
        }

        let mapping = role_mapping(
            self.api,
            &self.config.roles,
            &self.config.contacts,
            ctx,
        )?
        .clone();
        warn_unmapped_roles(&mapping, imported, ctx);
        let found = resolve_current_committees(self.api, roster, &self.config.contacts, ctx)?;
        let current = extract_current_memberships(self.api, roster, self.tracker, &mapping, &found)?;
        info!(
            "{} existing committee memberships identified in the CRM",
            current.len()
        );

        let diff = diff_memberships(&current, imported, &self.config.diff.ignored_attributes);
        info!(
            new = diff.new.len(),
            changed = diff.changed.len(),
            obsolete = diff.obsolete.len(),
            "{} changes to committee memberships detected",
            diff.total_changes()
        );

        let contacts = ContactIds {
            tracker: self.tracker,
            persons,
            committees,
        };
        let applied = apply_diff(self.api, &diff, &contacts, &mapping)?;
        Ok((diff, applied, current.len()))
    }
}

/// First roster address located at the parliament, used to fill in the
/// parliament's own address.
fn parliament_template<'r>(roster: &'r Roster, name: &str) -> Option<&'r Address> {
    roster
        .addresses()
        .iter()
        .find(|address| non_empty(&address.supplemental_address_1) == Some(name))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
