use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

use usecache_macro_utils::{
    collect_arg_idents, generate_id_expr, generate_kind_expr, generate_prelude,
    parse_use_cache_attributes,
};

/// Turns an async function into a cached computation.
///
/// The function's arguments become the cache key; its body runs inside a
/// fresh cache scope only when no usable entry exists. The generated function
/// returns `Result<usecache_core::CacheOutput, usecache_core::CacheError>`:
/// either the (possibly replayed) rendered stream, or a hanging placeholder
/// when the call turned into a dynamic hole during prerendering.
///
/// # Requirements
///
/// - **Function must be async** and a free function (no receiver)
/// - **Arguments**: plain identifiers whose types are `Clone + Send + Sync +
///   'static` and convert into `usecache_core::CacheArg`
/// - **Return type**: implements `usecache_core::IntoRendered` (strings,
///   bytes, byte streams, or a `Result` of those with a displayable error)
/// - **Context**: must be called inside `usecache_core::context::enter`
///
/// # Macro Parameters
///
/// - `private` (optional): per-request cache that may read cookies and
///   headers; never stored in a cache handler
/// - `handler` (optional): name of the cache handler to store entries in.
///   Default: the runtime's default in-memory handler
/// - `id` (optional): stable computation id. Default: module path and
///   function name
/// - `entry_point` (optional): marks a route entry point; fallback route
///   parameters are keyed by name instead of making the call dynamic
/// - `profile` (optional): cache life profile applied before the body runs
/// - `tags` (optional): tags applied before the body runs. Example:
///   `tags = ["posts"]`
///
/// # Examples
///
/// ```ignore
/// use usecache::use_cache;
///
/// #[use_cache(profile = "hours", tags = ["users"])]
/// async fn get_user(id: u64) -> String {
///     load_user_name(id).await
/// }
///
/// let name = get_user(42).await?.collect().await?;
/// ```
#[proc_macro_attribute]
pub fn use_cache(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let attrs = match parse_use_cache_attributes(attr.into()) {
        Ok(attrs) => attrs,
        Err(err) => return err.into(),
    };

    let fn_attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let fn_name = &sig.ident;

    if sig.asyncness.is_none() {
        return TokenStream::from(quote! {
            compile_error!("#[use_cache] can only be applied to async functions");
        });
    }

    let arg_idents = match collect_arg_idents(sig) {
        Ok(idents) => idents,
        Err(err) => return err.into(),
    };

    let ret_type = match &sig.output {
        syn::ReturnType::Default => quote! { () },
        syn::ReturnType::Type(_, ty) => quote! { #ty },
    };

    let kind_expr = generate_kind_expr(&attrs);
    let id_expr = generate_id_expr(&attrs, fn_name);
    let prelude = generate_prelude(&attrs);
    let entry_point: TokenStream2 = if attrs.entry_point {
        quote! { .entry_point() }
    } else {
        quote! {}
    };

    let generics = &sig.generics;
    let where_clause = &sig.generics.where_clause;
    let inputs = &sig.inputs;

    let expanded = quote! {
        #(#fn_attrs)*
        #vis async fn #fn_name #generics (#inputs)
            -> ::std::result::Result<usecache_core::CacheOutput, usecache_core::CacheError>
            #where_clause
        {
            let __args: ::std::vec::Vec<usecache_core::CacheArg> = vec![
                #(usecache_core::CacheArg::from(::std::clone::Clone::clone(&#arg_idents))),*
            ];

            let __computation = move |_: ::std::vec::Vec<usecache_core::CacheArg>| {
                #(
                    #[allow(unused_mut)]
                    let mut #arg_idents = ::std::clone::Clone::clone(&#arg_idents);
                )*
                async move {
                    #prelude
                    let __value: #ret_type = async move #block.await;
                    usecache_core::IntoRendered::into_rendered(__value)
                }
            };

            usecache_core::cache(#kind_expr, #id_expr, ::std::vec::Vec::new(), __computation)
                #entry_point
                .call(__args)
                .await
        }
    };

    TokenStream::from(expanded)
}
