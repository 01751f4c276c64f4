//! Capability resolution.
//!
//! - No IO
//! - No panics
//! - No precedence: capabilities only ever accumulate across matching bindings

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use ppghub_core::{AuthError, BindingId, InstitutionId, ProgramId, RoleId, UserId};

use crate::{AccessLevel, BindingScope, Capability, CapabilitySet, Role, RoleName, Scope, ScopeBinding};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing capability '{capability}' in {scope}")]
    Forbidden { capability: Capability, scope: Scope },

    #[error(transparent)]
    Authority(#[from] AuthError),
}

/// Collaborator-side authorization contract.
///
/// Implement this on actions that require capabilities; the caller checks
/// them through the resolver before performing the action.
pub trait RequiresCapability {
    fn required_capabilities(&self) -> &[Capability];
}

/// Which roles apply across every program of an institution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPolicy {
    pub global_scope_roles: BTreeSet<RoleName>,
}

impl ResolutionPolicy {
    pub fn new<I, N>(global_scope_roles: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<RoleName>,
    {
        Self {
            global_scope_roles: global_scope_roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_global_scope_role(&self, role: &Role) -> bool {
        self.global_scope_roles.contains(&role.name)
    }
}

/// Why a binding matched the requested scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    /// Bound to exactly the requested program.
    SameProgram,
    /// Bound to the institution owning the requested program (or asked globally).
    InstitutionWide,
    /// The role is configured to apply across its institution.
    GlobalScopeRole,
}

/// One binding's share of a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contribution {
    pub binding_id: BindingId,
    pub binding_scope: BindingScope,
    pub role_id: RoleId,
    pub role_name: RoleName,
    pub access_level: AccessLevel,
    pub reason: MatchReason,
    pub capabilities: CapabilitySet,
}

/// Effective capabilities of a user in a scope, with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub user_id: UserId,
    pub scope: Scope,
    pub capabilities: CapabilitySet,
    pub contributions: Vec<Contribution>,
}

impl Resolution {
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Advisory: the highest access level among matching roles.
    pub fn highest_access_level(&self) -> Option<AccessLevel> {
        self.contributions.iter().map(|c| c.access_level).max()
    }

    /// Check every capability an action requires.
    pub fn require<A>(&self, action: &A) -> Result<(), AuthzError>
    where
        A: RequiresCapability + ?Sized,
    {
        for capability in action.required_capabilities() {
            if !self.has(*capability) {
                return Err(AuthzError::Forbidden {
                    capability: *capability,
                    scope: self.scope,
                });
            }
        }
        Ok(())
    }

    pub fn explain(&self, required: Capability) -> AuthorizationExplanation {
        explain(self, required)
    }
}

/// Does `binding` (holding `role`) apply to `scope`?
///
/// `institution_of` maps programs to their owning institution; an unknown
/// program never matches through an institution.
pub fn match_binding<I>(
    binding_scope: BindingScope,
    role: &Role,
    scope: Scope,
    policy: &ResolutionPolicy,
    institution_of: &I,
) -> Option<MatchReason>
where
    I: Fn(ProgramId) -> Option<InstitutionId>,
{
    let global_role = policy.is_global_scope_role(role);

    match (scope, binding_scope) {
        (Scope::Program(requested), BindingScope::Program(bound)) => {
            if requested == bound {
                Some(MatchReason::SameProgram)
            } else if global_role && same_institution(requested, bound, institution_of) {
                Some(MatchReason::GlobalScopeRole)
            } else {
                None
            }
        }
        (Scope::Program(requested), BindingScope::Institution(inst)) => {
            (institution_of(requested) == Some(inst)).then_some(MatchReason::InstitutionWide)
        }
        (Scope::Global, BindingScope::Institution(_)) => Some(MatchReason::InstitutionWide),
        (Scope::Global, BindingScope::Program(_)) => {
            global_role.then_some(MatchReason::GlobalScopeRole)
        }
    }
}

fn same_institution<I>(a: ProgramId, b: ProgramId, institution_of: &I) -> bool
where
    I: Fn(ProgramId) -> Option<InstitutionId>,
{
    match (institution_of(a), institution_of(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Union of the capabilities of every effective binding matching `scope`.
///
/// Bindings whose role is unknown or inactive contribute nothing.
pub fn resolve<'r, R, I>(
    user_id: UserId,
    bindings: &[ScopeBinding],
    scope: Scope,
    now: DateTime<Utc>,
    policy: &ResolutionPolicy,
    role_of: R,
    institution_of: I,
) -> Resolution
where
    R: Fn(RoleId) -> Option<&'r Role>,
    I: Fn(ProgramId) -> Option<InstitutionId>,
{
    let mut capabilities = CapabilitySet::new();
    let mut contributions = Vec::new();

    for binding in bindings {
        if binding.user_id != user_id || !binding.is_effective(now) {
            continue;
        }
        let Some(role) = role_of(binding.role_id) else {
            continue;
        };
        if !role.active {
            continue;
        }
        let Some(reason) = match_binding(binding.scope, role, scope, policy, &institution_of) else {
            continue;
        };

        let granted = role.effective_capabilities();
        capabilities.extend_from(&granted);
        contributions.push(Contribution {
            binding_id: binding.id,
            binding_scope: binding.scope,
            role_id: role.id,
            role_name: role.name.clone(),
            access_level: role.access_level,
            reason,
            capabilities: granted,
        });
    }

    Resolution {
        user_id,
        scope,
        capabilities,
        contributions,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub user_id: UserId,
    pub scope: Scope,
    pub required_capability: Capability,
    pub granted: bool,
    /// Human-readable reason for the decision.
    pub reason: String,
    /// Bindings whose role grants the required capability.
    pub granting: Vec<Contribution>,
    /// Every binding that matched the scope.
    pub matched: Vec<Contribution>,
    pub effective_capabilities: Vec<&'static str>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// No effective binding applies to the scope at all.
    NoMatchingBinding,
    /// Bindings match, but none of their roles carries the capability.
    MissingCapability,
}

fn explain(resolution: &Resolution, required: Capability) -> AuthorizationExplanation {
    let granting: Vec<Contribution> = resolution
        .contributions
        .iter()
        .filter(|c| c.capabilities.contains(required))
        .cloned()
        .collect();
    let granted = !granting.is_empty();

    let (reason, denial_reason) = if granted {
        let roles: Vec<&str> = granting.iter().map(|c| c.role_name.as_str()).collect();
        (
            format!("'{required}' granted in {} by role(s) {roles:?}", resolution.scope),
            None,
        )
    } else if resolution.contributions.is_empty() {
        (
            format!("no active binding applies to {}", resolution.scope),
            Some(DenialReason {
                kind: DenialKind::NoMatchingBinding,
                message: format!("user {} holds no active binding in {}", resolution.user_id, resolution.scope),
                suggestions: vec![
                    format!("Grant a role carrying '{required}' in {}", resolution.scope),
                    "Check whether an existing binding is suspended or has ended".to_string(),
                ],
            }),
        )
    } else {
        let roles: Vec<&str> = resolution.contributions.iter().map(|c| c.role_name.as_str()).collect();
        (
            format!(
                "none of the matching roles {roles:?} grants '{required}' in {}",
                resolution.scope
            ),
            Some(DenialReason {
                kind: DenialKind::MissingCapability,
                message: format!("missing required capability '{required}'"),
                suggestions: vec![
                    format!("Grant a role carrying '{required}' in {}", resolution.scope),
                    "Check whether one of the matching roles was deactivated or narrowed".to_string(),
                ],
            }),
        )
    };

    AuthorizationExplanation {
        user_id: resolution.user_id,
        scope: resolution.scope,
        required_capability: required,
        granted,
        reason,
        granting,
        matched: resolution.contributions.clone(),
        effective_capabilities: resolution.capabilities.names(),
        denial_reason,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Duration;
    use proptest::prelude::*;

    use crate::{BindingKey, NewBinding, RoleDefinition, default_catalog};

    use super::*;

    const UNIRIO: InstitutionId = InstitutionId::new(1);
    const UFRJ: InstitutionId = InstitutionId::new(2);

    fn institution_of(program: ProgramId) -> Option<InstitutionId> {
        match program.get() {
            1 | 2 => Some(UNIRIO),
            3 | 4 => Some(UFRJ),
            _ => None,
        }
    }

    fn catalog(at: DateTime<Utc>) -> HashMap<RoleId, Role> {
        default_catalog()
            .into_iter()
            .enumerate()
            .map(|(i, def)| {
                let id = RoleId::new(i as u64 + 1);
                (id, Role::from_definition(id, def, at))
            })
            .collect()
    }

    fn role_id(roles: &HashMap<RoleId, Role>, name: &str) -> RoleId {
        roles
            .values()
            .find(|r| r.name.as_str() == name)
            .map(|r| r.id)
            .unwrap()
    }

    fn bind(id: u64, user: UserId, scope: BindingScope, role: RoleId, at: DateTime<Utc>) -> ScopeBinding {
        ScopeBinding::create(
            BindingId::new(id),
            NewBinding {
                key: BindingKey {
                    user_id: user,
                    scope,
                    role_id: role,
                },
                bound_at: at,
                granted_by: None,
                notes: None,
            },
            at,
        )
    }

    fn run(
        roles: &HashMap<RoleId, Role>,
        bindings: &[ScopeBinding],
        scope: Scope,
        policy: &ResolutionPolicy,
        now: DateTime<Utc>,
    ) -> Resolution {
        resolve(
            UserId::new(1),
            bindings,
            scope,
            now,
            policy,
            |id| roles.get(&id),
            institution_of,
        )
    }

    #[test]
    fn program_bindings_stay_in_their_program() {
        let now = Utc::now();
        let roles = catalog(now);
        let user = UserId::new(1);
        let p1 = ProgramId::new(1);
        let p2 = ProgramId::new(2);
        let coordenador = role_id(&roles, "coordenador");
        let docente = role_id(&roles, "docente");
        let bindings = vec![
            bind(1, user, p1.into(), coordenador, now),
            bind(2, user, p2.into(), docente, now),
        ];
        let policy = ResolutionPolicy::default();

        let at_p1 = run(&roles, &bindings, Scope::Program(p1), &policy, now);
        assert_eq!(at_p1.capabilities, roles[&coordenador].capabilities);

        let at_p2 = run(&roles, &bindings, Scope::Program(p2), &policy, now);
        assert_eq!(at_p2.capabilities, roles[&docente].capabilities);

        let global = run(&roles, &bindings, Scope::Global, &policy, now);
        assert!(global.capabilities.is_empty());

        let policy = ResolutionPolicy::new(["coordenador"]);
        let global = run(&roles, &bindings, Scope::Global, &policy, now);
        assert_eq!(global.capabilities, roles[&coordenador].capabilities);
        assert_eq!(global.contributions[0].reason, MatchReason::GlobalScopeRole);
    }

    #[test]
    fn global_scope_role_spans_its_institution_only() {
        let now = Utc::now();
        let roles = catalog(now);
        let coordenador = role_id(&roles, "coordenador");
        let bindings = vec![bind(1, UserId::new(1), ProgramId::new(1).into(), coordenador, now)];
        let policy = ResolutionPolicy::new(["coordenador"]);

        let sibling = run(&roles, &bindings, Scope::Program(ProgramId::new(2)), &policy, now);
        assert!(sibling.has(Capability::ManageProgram));

        let other_institution = run(&roles, &bindings, Scope::Program(ProgramId::new(3)), &policy, now);
        assert!(other_institution.capabilities.is_empty());
    }

    #[test]
    fn institution_binding_covers_every_program_of_the_institution() {
        let now = Utc::now();
        let roles = catalog(now);
        let admin = role_id(&roles, "administrador");
        let bindings = vec![bind(1, UserId::new(1), UFRJ.into(), admin, now)];
        let policy = ResolutionPolicy::default();

        assert!(run(&roles, &bindings, Scope::Program(ProgramId::new(3)), &policy, now).has(Capability::ManageUsers));
        assert!(run(&roles, &bindings, Scope::Program(ProgramId::new(4)), &policy, now).has(Capability::ManageUsers));
        assert!(!run(&roles, &bindings, Scope::Program(ProgramId::new(1)), &policy, now).has(Capability::ManageUsers));
        assert!(run(&roles, &bindings, Scope::Global, &policy, now).has(Capability::ManageUsers));
        assert!(!run(&roles, &bindings, Scope::Program(ProgramId::new(99)), &policy, now).has(Capability::ManageUsers));
    }

    #[test]
    fn suspended_ended_and_future_bindings_grant_nothing() {
        let now = Utc::now();
        let roles = catalog(now);
        let docente = role_id(&roles, "docente");
        let user = UserId::new(1);
        let p1 = ProgramId::new(1);
        let policy = ResolutionPolicy::default();

        let mut suspended = bind(1, user, p1.into(), docente, now);
        suspended.suspend().unwrap();
        let mut ended = bind(2, user, p1.into(), docente, now - Duration::days(2));
        ended.end(now - Duration::days(1)).unwrap();
        let future = bind(3, user, p1.into(), docente, now + Duration::days(1));

        let r = run(&roles, &[suspended, ended, future], Scope::Program(p1), &policy, now);
        assert!(r.capabilities.is_empty());
        assert!(r.contributions.is_empty());
    }

    #[test]
    fn inactive_role_contributes_nothing() {
        let now = Utc::now();
        let mut roles = catalog(now);
        let docente = role_id(&roles, "docente");
        if let Some(role) = roles.get_mut(&docente) {
            role.active = false;
        }
        let bindings = vec![bind(1, UserId::new(1), ProgramId::new(1).into(), docente, now)];

        let r = run(&roles, &bindings, Scope::Program(ProgramId::new(1)), &ResolutionPolicy::default(), now);
        assert!(r.capabilities.is_empty());
    }

    #[test]
    fn bindings_of_other_users_are_ignored() {
        let now = Utc::now();
        let roles = catalog(now);
        let admin = role_id(&roles, "administrador");
        let bindings = vec![bind(1, UserId::new(2), ProgramId::new(1).into(), admin, now)];

        let r = run(&roles, &bindings, Scope::Program(ProgramId::new(1)), &ResolutionPolicy::default(), now);
        assert!(r.capabilities.is_empty());
    }

    #[test]
    fn explanation_names_granting_roles_and_denials() {
        let now = Utc::now();
        let roles = catalog(now);
        let docente = role_id(&roles, "docente");
        let bindings = vec![bind(1, UserId::new(1), ProgramId::new(1).into(), docente, now)];
        let policy = ResolutionPolicy::default();
        let r = run(&roles, &bindings, Scope::Program(ProgramId::new(1)), &policy, now);

        let yes = r.explain(Capability::RecordGrades);
        assert!(yes.granted);
        assert_eq!(yes.granting.len(), 1);
        assert_eq!(yes.granting[0].role_name.as_str(), "docente");
        assert!(yes.denial_reason.is_none());

        let no = r.explain(Capability::ManageRoles);
        assert!(!no.granted);
        assert_eq!(no.denial_reason.unwrap().kind, DenialKind::MissingCapability);

        let elsewhere = run(&roles, &bindings, Scope::Program(ProgramId::new(2)), &policy, now);
        let no = elsewhere.explain(Capability::RecordGrades);
        assert_eq!(no.denial_reason.unwrap().kind, DenialKind::NoMatchingBinding);
    }

    struct PublishGrades;

    impl RequiresCapability for PublishGrades {
        fn required_capabilities(&self) -> &[Capability] {
            &[Capability::RecordGrades, Capability::ViewRecords]
        }
    }

    #[test]
    fn require_checks_every_capability_of_the_action() {
        let now = Utc::now();
        let mut roles = catalog(now);
        let docente = role_id(&roles, "docente");
        let monitor = RoleId::new(99);
        roles.insert(
            monitor,
            Role::from_definition(
                monitor,
                RoleDefinition::new("monitor", 1, CapabilitySet::from([Capability::ViewRecords])),
                now,
            ),
        );
        let p1 = ProgramId::new(1);
        let policy = ResolutionPolicy::default();

        let only_docente = vec![bind(1, UserId::new(1), p1.into(), docente, now)];
        let r = run(&roles, &only_docente, Scope::Program(p1), &policy, now);
        assert_eq!(
            r.require(&PublishGrades),
            Err(AuthzError::Forbidden {
                capability: Capability::ViewRecords,
                scope: Scope::Program(p1)
            })
        );

        let both = vec![
            bind(1, UserId::new(1), p1.into(), docente, now),
            bind(2, UserId::new(1), p1.into(), monitor, now),
        ];
        let r = run(&roles, &both, Scope::Program(p1), &policy, now);
        assert_eq!(r.require(&PublishGrades), Ok(()));
        assert_eq!(r.highest_access_level(), Some(AccessLevel::new(2)));
    }

    // ── properties ──────────────────────────────────────────────────────────

    fn arb_scope() -> impl Strategy<Value = Scope> {
        prop_oneof![
            Just(Scope::Global),
            (1u64..=5).prop_map(|p| Scope::Program(ProgramId::new(p))),
        ]
    }

    fn arb_binding_scope() -> impl Strategy<Value = BindingScope> {
        prop_oneof![
            (1u64..=5).prop_map(|p| BindingScope::Program(ProgramId::new(p))),
            (1u64..=2).prop_map(|i| BindingScope::Institution(InstitutionId::new(i))),
        ]
    }

    fn arb_bindings() -> impl Strategy<Value = Vec<(BindingScope, u64)>> {
        prop::collection::vec((arb_binding_scope(), 1u64..=5), 0..8)
    }

    fn materialise(spec: &[(BindingScope, u64)], now: DateTime<Utc>) -> Vec<ScopeBinding> {
        spec.iter()
            .enumerate()
            .map(|(i, (scope, role))| bind(i as u64 + 1, UserId::new(1), *scope, RoleId::new(*role), now))
            .collect()
    }

    fn arb_policy() -> impl Strategy<Value = ResolutionPolicy> {
        prop::sample::subsequence(
            vec!["administrador", "coordenador", "secretaria", "docente", "discente"],
            0..=2,
        )
        .prop_map(ResolutionPolicy::new)
    }

    proptest! {
        #[test]
        fn resolution_is_union_of_contributions(
            spec in arb_bindings(),
            scope in arb_scope(),
            policy in arb_policy(),
        ) {
            let now = Utc::now();
            let roles = catalog(now);
            let bindings = materialise(&spec, now);
            let r = run(&roles, &bindings, scope, &policy, now);

            let mut union = CapabilitySet::new();
            for c in &r.contributions {
                prop_assert_eq!(&c.capabilities, &roles[&c.role_id].capabilities);
                union.extend_from(&c.capabilities);
            }
            prop_assert_eq!(union, r.capabilities.clone());

            let again = run(&roles, &bindings, scope, &policy, now);
            prop_assert_eq!(again, r);
        }

        #[test]
        fn granting_never_shrinks(
            spec in arb_bindings(),
            extra in (arb_binding_scope(), 1u64..=5),
            scope in arb_scope(),
            policy in arb_policy(),
        ) {
            let now = Utc::now();
            let roles = catalog(now);
            let before = run(&roles, &materialise(&spec, now), scope, &policy, now);

            let mut grown = spec.clone();
            grown.push(extra);
            let after = run(&roles, &materialise(&grown, now), scope, &policy, now);

            prop_assert!(after.capabilities.is_superset(&before.capabilities));
        }

        #[test]
        fn revoking_never_grows(
            spec in arb_bindings(),
            victim in any::<prop::sample::Index>(),
            scope in arb_scope(),
            policy in arb_policy(),
        ) {
            let now = Utc::now();
            let roles = catalog(now);
            let mut bindings = materialise(&spec, now);
            let before = run(&roles, &bindings, scope, &policy, now);

            if !bindings.is_empty() {
                let i = victim.index(bindings.len());
                bindings[i].end(now).unwrap();
            }
            let after = run(&roles, &bindings, scope, &policy, now);

            prop_assert!(before.capabilities.is_superset(&after.capabilities));
        }
    }
}
