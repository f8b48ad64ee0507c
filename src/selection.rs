//! Member selection
//!
//! Decides which constructor, method, field or property a pipeline uses.
//! Every candidate parameter is ranked against what would be supplied for
//! it; a candidate with any [`MatchRank::NoMatch`] parameter is dropped and
//! the highest aggregate rank wins. Ties go to the earliest declaration, so
//! selection is deterministic for a given registry state.

use crate::injection::InjectionArg;
use crate::metadata::{Constructor, Member, MetadataProvider, Method, Parameter, TypeMetadata};
use crate::types::{TypeDescriptor, TypeKind};
use thiserror::Error;

/// How well a supplied value fits a declared parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchRank {
    /// Cannot be satisfied
    NoMatch,
    /// Satisfiable through assignability or implicit construction
    Compatible,
    /// Supplied by a resolver callback
    HigherProspect,
    /// Same type, or a registered contract for exactly this type
    ExactMatch,
}

impl MatchRank {
    /// Numeric weight used for aggregation
    #[inline]
    pub fn weight(self) -> i32 {
        match self {
            MatchRank::NoMatch => -1,
            MatchRank::Compatible => 1,
            MatchRank::HigherProspect => 2,
            MatchRank::ExactMatch => 3,
        }
    }
}

/// Reasons no member could be selected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("{type_name} is {kind:?} and cannot be constructed")]
    NotConstructible { type_name: String, kind: TypeKind },

    #[error("{type_name} declares no accessible constructor")]
    NoConstructors { type_name: String },

    #[error("No {member} of {type_name} matches the supplied {arity} argument(s)")]
    NoMatchingSignature {
        type_name: String,
        member: String,
        arity: usize,
    },

    #[error("No constructor of {type_name} can be satisfied from the container")]
    Unsatisfiable { type_name: String },

    #[error("{type_name} has no {kind} named '{name}'")]
    NoSuchMember {
        type_name: String,
        kind: &'static str,
        name: String,
    },

    #[error("{kind} '{name}' of {type_name} cannot accept the supplied value")]
    IncompatibleMember {
        type_name: String,
        kind: &'static str,
        name: String,
    },
}

/// A member with a parameter list
pub trait Signature {
    fn parameters(&self) -> &[Parameter];
}

impl Signature for Constructor {
    #[inline]
    fn parameters(&self) -> &[Parameter] {
        Constructor::parameters(self)
    }
}

impl Signature for Method {
    #[inline]
    fn parameters(&self) -> &[Parameter] {
        Method::parameters(self)
    }
}

/// Rank a supplied type against a declared one
pub fn match_type(
    declared: &TypeDescriptor,
    supplied: &TypeDescriptor,
    provider: &dyn MetadataProvider,
) -> MatchRank {
    if declared == supplied {
        return MatchRank::ExactMatch;
    }
    if declared.is_generic_definition() && supplied.definition() == Some(declared) {
        return MatchRank::ExactMatch;
    }
    if provider.is_assignable(supplied, declared) {
        return MatchRank::Compatible;
    }
    MatchRank::NoMatch
}

/// Rank an injection argument against a declared type
pub fn match_arg(declared: &TypeDescriptor, arg: &InjectionArg, provider: &dyn MetadataProvider) -> MatchRank {
    match arg.ty() {
        Some(supplied) => match_type(declared, supplied, provider),
        None => MatchRank::HigherProspect,
    }
}

/// Aggregate rank of a candidate; `None` if any parameter cannot be matched
fn aggregate<F>(params: &[Parameter], mut rank: F) -> Option<i32>
where
    F: FnMut(usize, &Parameter) -> MatchRank,
{
    let mut total = 0;
    for (index, param) in params.iter().enumerate() {
        match rank(index, param) {
            MatchRank::NoMatch => return None,
            matched => total += matched.weight(),
        }
    }
    Some(total)
}

/// Highest-ranked candidate; earliest declaration wins ties
fn best<'c, C, I, F>(candidates: I, mut rank: F) -> Option<(usize, &'c C)>
where
    C: Signature + 'c,
    I: IntoIterator<Item = (usize, &'c C)>,
    F: FnMut(usize, &Parameter) -> MatchRank,
{
    let mut winner: Option<(i32, usize, &'c C)> = None;
    for (index, candidate) in candidates {
        let Some(score) = aggregate(candidate.parameters(), &mut rank) else {
            continue;
        };
        if winner.is_none_or(|(top, _, _)| score > top) {
            winner = Some((score, index, candidate));
        }
    }
    winner.map(|(_, index, candidate)| (index, candidate))
}

/// Candidate whose signature structurally matches the supplied arguments
pub fn select_by_arguments<'c, C, I>(
    candidates: I,
    args: &[InjectionArg],
    provider: &dyn MetadataProvider,
) -> Option<(usize, &'c C)>
where
    C: Signature + 'c,
    I: IntoIterator<Item = (usize, &'c C)>,
{
    best(
        candidates
            .into_iter()
            .filter(|(_, c)| c.parameters().len() == args.len()),
        |index, param| match_arg(param.ty(), &args[index], provider),
    )
}

/// Select the constructor used to build `metadata`'s type.
///
/// Order: explicit constructor directive, preferred constructor, single
/// candidate, then ranking with `rank` for each parameter.
pub fn select_constructor<'m, F>(
    metadata: &'m TypeMetadata,
    directive: Option<&[InjectionArg]>,
    provider: &dyn MetadataProvider,
    mut rank: F,
) -> Result<(usize, &'m Constructor), SelectionError>
where
    F: FnMut(&Parameter) -> MatchRank,
{
    let ty = metadata.ty();
    if !ty.kind().is_constructible() {
        return Err(SelectionError::NotConstructible {
            type_name: ty.name().to_string(),
            kind: ty.kind(),
        });
    }

    let constructors = metadata.constructors();
    if constructors.is_empty() {
        return Err(SelectionError::NoConstructors {
            type_name: ty.name().to_string(),
        });
    }

    if let Some(args) = directive {
        return select_by_arguments(constructors.iter().enumerate(), args, provider).ok_or_else(|| {
            SelectionError::NoMatchingSignature {
                type_name: ty.name().to_string(),
                member: "constructor".to_string(),
                arity: args.len(),
            }
        });
    }

    if let Some(preferred) = constructors.iter().position(Constructor::is_preferred) {
        return Ok((preferred, &constructors[preferred]));
    }

    if constructors.len() == 1 {
        return Ok((0, &constructors[0]));
    }

    best(constructors.iter().enumerate(), |_, param| rank(param)).ok_or_else(|| {
        SelectionError::Unsatisfiable {
            type_name: ty.name().to_string(),
        }
    })
}

/// Select the method named `name` matching the supplied arguments
pub fn select_method<'m>(
    metadata: &'m TypeMetadata,
    name: &str,
    args: &[InjectionArg],
    provider: &dyn MetadataProvider,
) -> Result<&'m Method, SelectionError> {
    let type_name = metadata.ty().name();
    let named: Vec<(usize, &'m Method)> = metadata
        .methods()
        .iter()
        .enumerate()
        .filter(|(_, m)| m.name() == name)
        .collect();

    if named.is_empty() {
        return Err(SelectionError::NoSuchMember {
            type_name: type_name.to_string(),
            kind: "method",
            name: name.to_string(),
        });
    }

    select_by_arguments(named, args, provider)
        .map(|(_, method)| method)
        .ok_or_else(|| SelectionError::NoMatchingSignature {
            type_name: type_name.to_string(),
            member: format!("method '{}'", name),
            arity: args.len(),
        })
}

/// Select the field or property named `name`, checking a supplied argument
pub fn select_member<'m>(
    type_name: &str,
    members: &'m [Member],
    kind: &'static str,
    name: &str,
    arg: Option<&InjectionArg>,
    provider: &dyn MetadataProvider,
) -> Result<&'m Member, SelectionError> {
    let member = members
        .iter()
        .find(|m| m.name() == name)
        .ok_or_else(|| SelectionError::NoSuchMember {
            type_name: type_name.to_string(),
            kind,
            name: name.to_string(),
        })?;

    if let Some(arg) = arg {
        if match_arg(member.ty(), arg, provider) == MatchRank::NoMatch {
            return Err(SelectionError::IncompatibleMember {
                type_name: type_name.to_string(),
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(member)
}

/// Unwrap `ty` to the first layer that `is_registered` accepts.
///
/// Arrays unwrap to their element type; closed generics unwrap to their
/// definition, then to each type argument in turn. Returns `ty` itself when
/// no layer is registered.
pub(crate) fn final_type<F>(ty: &TypeDescriptor, is_registered: F) -> TypeDescriptor
where
    F: Fn(&TypeDescriptor) -> bool,
{
    find_layer(ty, &is_registered).unwrap_or_else(|| ty.clone())
}

fn find_layer<F>(ty: &TypeDescriptor, is_registered: &F) -> Option<TypeDescriptor>
where
    F: Fn(&TypeDescriptor) -> bool,
{
    if is_registered(ty) {
        return Some(ty.clone());
    }
    if let Some(element) = ty.element() {
        return find_layer(element, is_registered);
    }
    if let Some(definition) = ty.definition() {
        if is_registered(definition) {
            return Some(definition.clone());
        }
        return ty
            .arguments()
            .iter()
            .find_map(|argument| find_layer(argument, is_registered));
    }
    None
}
