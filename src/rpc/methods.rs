//! Domain methods exposed by the background process.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{dispatcher::Dispatcher, protocol::PROTOCOL_VERSION};
use crate::{
   Result,
   app::AppContext,
   local_store::{PageInput, TagPatch},
   types::TitleSource,
};

/// Reply to `system.hello`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
   pub protocol_version: u32,
   pub binary_version:   String,
   pub profile:          String,
   pub pid:              u32,
}

/// Registers one handler whose body receives its own clone of the context.
macro_rules! method {
   ($d:expr, $app:expr, $name:literal, |$ctx:ident, $args:tt: $ty:ty| $body:expr) => {{
      let app = Arc::clone(&$app);
      $d.register($name, move |$args: $ty| {
         let $ctx = Arc::clone(&app);
         async move {
            let out: Result<_> = $body;
            out
         }
      });
   }};
}

pub fn register_all(d: &mut Dispatcher, app: &Arc<AppContext>) {
   method!(d, app, "system.hello", |ctx, (): ()| {
      Ok(Hello {
         protocol_version: PROTOCOL_VERSION,
         binary_version:   env!("CARGO_PKG_VERSION").to_string(),
         profile:          ctx.config().profile.clone(),
         pid:              std::process::id(),
      })
   });

   // Tags
   method!(d, app, "tags.create", |ctx, (name,): (String,)| {
      ctx.mutate(move |s| s.create_tag(&name)).await
   });
   method!(d, app, "tags.update", |ctx, (id, patch): (String, TagPatch)| {
      ctx.mutate(move |s| s.update_tag(&id, patch)).await
   });
   method!(d, app, "tags.delete", |ctx, (id,): (String,)| {
      ctx.mutate(move |s| Ok(s.delete_tag(&id))).await
   });
   method!(d, app, "tags.bind", |ctx, (a, b): (String, String)| {
      ctx.mutate(move |s| s.bind_tags(&a, &b)).await
   });
   method!(d, app, "tags.unbind", |ctx, (a, b): (String, String)| {
      ctx.mutate(move |s| Ok(s.unbind_tags(&a, &b))).await
   });
   method!(d, app, "tags.list", |ctx, (): ()| {
      Ok(ctx.read(|s| s.get_all_tags_with_usage()).await)
   });
   method!(d, app, "tags.get", |ctx, (id,): (String,)| {
      Ok(ctx.read(|s| s.get_tag(&id)).await)
   });
   method!(d, app, "tags.bound", |ctx, (id,): (String,)| {
      Ok(ctx.read(|s| s.get_bound_tags(&id)).await)
   });

   // Pages
   method!(d, app, "pages.upsert", |ctx, (input,): (PageInput,)| {
      ctx.mutate(move |s| s.create_or_update_page(input)).await
   });
   method!(d, app, "pages.delete", |ctx, (id,): (String,)| {
      ctx.mutate(move |s| Ok(s.delete_page(&id))).await
   });
   method!(d, app, "pages.list", |ctx, (): ()| {
      Ok(ctx.read(|s| s.get_all_pages()).await)
   });
   method!(d, app, "pages.get", |ctx, (id,): (String,)| {
      Ok(ctx.read(|s| s.get_page(&id)).await)
   });
   method!(d, app, "pages.by_tag", |ctx, (tag_id,): (String,)| {
      Ok(ctx.read(|s| s.get_pages_by_tag(&tag_id)).await)
   });
   method!(d, app, "pages.search", |ctx, (query,): (String,)| {
      Ok(ctx.read(|s| s.search_pages(&query)).await)
   });
   method!(d, app, "pages.add_tag", |ctx, (page_id, tag_id): (String, String)| {
      ctx.mutate(move |s| Ok(s.add_tag_to_page(&page_id, &tag_id))).await
   });
   method!(d, app, "pages.remove_tag", |ctx, (page_id, tag_id): (String, String)| {
      ctx.mutate(move |s| Ok(s.remove_tag_from_page(&page_id, &tag_id))).await
   });
   method!(
      d,
      app,
      "pages.update_title",
      |ctx, (id, title, source): (String, String, Option<TitleSource>)| {
         let source = source.unwrap_or(TitleSource::Manual);
         ctx.mutate(move |s| Ok(s.update_page_title(&id, &title, source))).await
      }
   );

   // Stats, sync, maintenance
   method!(d, app, "stats.user", |ctx, (): ()| {
      Ok(ctx.read(|s| s.get_user_stats()).await)
   });
   method!(d, app, "sync.run", |ctx, (full,): (Option<bool>,)| {
      ctx.sync().sync_all(full.unwrap_or(false)).await
   });
   method!(d, app, "sync.status", |ctx, (): ()| ctx.sync().status().await);
   method!(d, app, "data.clear", |ctx, (): ()| {
      ctx.clear_data().await.map(|()| true)
   });
}
