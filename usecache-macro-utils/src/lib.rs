//! Shared utilities for usecache procedural macros
//!
//! Attribute parsing and the small code generation helpers used by
//! `usecache-macros`.

use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{punctuated::Punctuated, Expr, FnArg, Ident, Meta, MetaNameValue, Pat, Signature, Token};

/// Parsed `#[use_cache(...)]` attributes
#[derive(Default)]
pub struct UseCacheAttributes {
    pub private: bool,
    pub entry_point: bool,
    pub handler: Option<String>,
    pub id: Option<String>,
    pub profile: Option<String>,
    pub tags: Vec<String>,
}

fn error(message: &str) -> TokenStream2 {
    quote! { compile_error!(#message) }
}

/// Parse a string-valued attribute such as `handler = "remote"`
pub fn parse_string_attribute(nv: &MetaNameValue, name: &str) -> Result<String, TokenStream2> {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            syn::Lit::Str(s) => Ok(s.value()),
            _ => Err(error(&format!("Invalid literal for `{name}`: expected string"))),
        },
        _ => Err(error(&format!(
            "Invalid syntax for `{name}`: expected `{name} = \"...\"`"
        ))),
    }
}

/// Parse the `tags` attribute: an array of string literals
pub fn parse_tags_attribute(nv: &MetaNameValue) -> Result<Vec<String>, TokenStream2> {
    match &nv.value {
        Expr::Array(array) => array
            .elems
            .iter()
            .map(|elem| match elem {
                Expr::Lit(expr_lit) => match &expr_lit.lit {
                    syn::Lit::Str(s) => Ok(s.value()),
                    _ => Err(error("Invalid tag: expected string literal")),
                },
                _ => Err(error("Invalid tag: expected string literal")),
            })
            .collect(),
        _ => Err(error(
            "Invalid syntax for `tags`: expected `tags = [\"a\", \"b\"]`",
        )),
    }
}

/// Parse `#[use_cache(...)]` attributes from a token stream
pub fn parse_use_cache_attributes(attr: TokenStream2) -> Result<UseCacheAttributes, TokenStream2> {
    use syn::parse::Parser;

    let parser = Punctuated::<Meta, Token![,]>::parse_terminated;
    let parsed_args = parser.parse2(attr).map_err(|e| {
        let msg = format!("Failed to parse attributes: {}", e);
        quote! { compile_error!(#msg) }
    })?;

    let mut attrs = UseCacheAttributes::default();

    for meta in parsed_args {
        match meta {
            Meta::Path(path) if path.is_ident("private") => attrs.private = true,
            Meta::Path(path) if path.is_ident("entry_point") => attrs.entry_point = true,
            Meta::NameValue(nv) if nv.path.is_ident("handler") => {
                attrs.handler = Some(parse_string_attribute(&nv, "handler")?);
            }
            Meta::NameValue(nv) if nv.path.is_ident("id") => {
                attrs.id = Some(parse_string_attribute(&nv, "id")?);
            }
            Meta::NameValue(nv) if nv.path.is_ident("profile") => {
                attrs.profile = Some(parse_string_attribute(&nv, "profile")?);
            }
            Meta::NameValue(nv) if nv.path.is_ident("tags") => {
                attrs.tags = parse_tags_attribute(&nv)?;
            }
            other => {
                let name = quote!(#other).to_string();
                return Err(error(&format!(
                    "Unknown attribute `{name}`: expected `private`, `entry_point`, `handler`, `id`, `profile` or `tags`"
                )));
            }
        }
    }

    if attrs.private && attrs.handler.is_some() {
        return Err(error(
            "`private` caches never reach a cache handler; remove `handler`",
        ));
    }

    Ok(attrs)
}

/// The `CacheKind` expression for the parsed attributes
pub fn generate_kind_expr(attrs: &UseCacheAttributes) -> TokenStream2 {
    match (&attrs.handler, attrs.private) {
        (_, true) => quote! { usecache_core::CacheKind::Private },
        (Some(handler), false) => {
            quote! { usecache_core::CacheKind::Named(#handler.to_string()) }
        }
        (None, false) => quote! { usecache_core::CacheKind::Default },
    }
}

/// The computation id: the explicit `id`, or the function's module path and name
pub fn generate_id_expr(attrs: &UseCacheAttributes, fn_name: &Ident) -> TokenStream2 {
    match &attrs.id {
        Some(id) => quote! { #id },
        None => {
            let name = fn_name.to_string();
            quote! { concat!(module_path!(), "::", #name) }
        }
    }
}

/// Argument identifiers of a free function; receivers and destructuring
/// patterns are rejected
pub fn collect_arg_idents(sig: &Signature) -> Result<Vec<Ident>, TokenStream2> {
    sig.inputs
        .iter()
        .map(|arg| match arg {
            FnArg::Receiver(_) => Err(error(
                "#[use_cache] cannot be applied to methods; pass the receiver's data as arguments",
            )),
            FnArg::Typed(pat_type) => match pat_type.pat.as_ref() {
                Pat::Ident(pat_ident) => Ok(pat_ident.ident.clone()),
                _ => Err(error(
                    "#[use_cache] arguments must be plain identifiers",
                )),
            },
        })
        .collect()
}

/// Statements run at the start of the computation: profile and tags
pub fn generate_prelude(attrs: &UseCacheAttributes) -> TokenStream2 {
    let profile_call = match &attrs.profile {
        Some(profile) => quote! {
            if let Err(e) = usecache_core::cache_life_profile(#profile) {
                return Err(usecache_core::ComputationError::new(e.to_string()));
            }
        },
        None => quote! {},
    };
    let tags = &attrs.tags;
    let tag_call = if tags.is_empty() {
        quote! {}
    } else {
        quote! {
            if let Err(e) = usecache_core::cache_tag([#(#tags),*]) {
                return Err(usecache_core::ComputationError::new(e.to_string()));
            }
        }
    };
    quote! {
        #profile_call
        #tag_call
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags_and_values() {
        let attrs = parse_use_cache_attributes(quote! {
            entry_point, handler = "remote", id = "users#get", tags = ["a", "b"]
        })
        .unwrap_or_else(|_| panic!("attributes should parse"));
        assert!(attrs.entry_point);
        assert!(!attrs.private);
        assert_eq!(attrs.handler.as_deref(), Some("remote"));
        assert_eq!(attrs.id.as_deref(), Some("users#get"));
        assert_eq!(attrs.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_private_with_handler_is_rejected() {
        assert!(parse_use_cache_attributes(quote! { private, handler = "x" }).is_err());
    }

    #[test]
    fn test_unknown_attribute_is_rejected() {
        assert!(parse_use_cache_attributes(quote! { limit = 10 }).is_err());
    }

    #[test]
    fn test_kind_expr() {
        let attrs = UseCacheAttributes {
            private: true,
            ..Default::default()
        };
        assert!(generate_kind_expr(&attrs).to_string().contains("Private"));
    }

    #[test]
    fn test_methods_are_rejected() {
        let sig: Signature = syn::parse_quote! { async fn get(&self, id: u64) -> String };
        assert!(collect_arg_idents(&sig).is_err());

        let sig: Signature = syn::parse_quote! { async fn get(id: u64, slug: String) -> String };
        let idents = collect_arg_idents(&sig).unwrap_or_default();
        assert_eq!(idents.len(), 2);
    }
}
