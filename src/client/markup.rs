//! HTML extraction for the catalog site. Pages that don't match yield empty lists.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{BrandIndex, RawGeneration, RawModel};
use crate::models::Brand;

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static BRAND_COUNT: LazyLock<Selector> = LazyLock::new(|| selector(".carbrnum b"));
static BRAND_BLOCK: LazyLock<Selector> = LazyLock::new(|| selector(".carman"));
static BRAND_NAME: LazyLock<Selector> = LazyLock::new(|| selector("h5 a span"));
static BRAND_LINK: LazyLock<Selector> = LazyLock::new(|| selector("h5 a"));
static BRAND_STATS: LazyLock<Selector> = LazyLock::new(|| selector("p b"));

static MODEL_LINK: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"a[title*="specs and photos"]"#));
static MODEL_YEARS: LazyLock<Selector> = LazyLock::new(|| selector(".years, .semra"));

static GEN_BLOCK: LazyLock<Selector> = LazyLock::new(|| selector(".carmodel"));
static GEN_HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h2"));
static GEN_LINK: LazyLock<Selector> = LazyLock::new(|| selector("h2 a[href], a[href]"));
static GEN_NAME: LazyLock<Selector> = LazyLock::new(|| selector(r#"h2 [itemprop="name"]"#));
static GEN_YEARS: LazyLock<Selector> = LazyLock::new(|| selector(".years"));

static IMG: LazyLock<Selector> = LazyLock::new(|| selector("img"));

const MODEL_TITLE_SUFFIX: &str = " specs and photos";

fn text_of(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Lazy-loaded images carry a placeholder in `src` and the real URL in `data-src`.
fn image_source(img: ElementRef, base: &Url) -> Option<String> {
    let attrs = img.value();
    let src = attrs
        .attr("src")
        .filter(|s| !s.trim().is_empty() && !s.contains("blank.gif"))
        .or_else(|| attrs.attr("data-src"))?;
    Some(resolve(base, src.trim()))
}

fn has_class(el: ElementRef, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

fn parent_element(el: ElementRef) -> Option<ElementRef> {
    el.parent().and_then(ElementRef::wrap)
}

pub fn parse_brand_index(html: &str, base: &Url) -> BrandIndex {
    let doc = Html::parse_document(html);

    let claimed_count = doc
        .select(&BRAND_COUNT)
        .next()
        .and_then(|b| text_of(b).parse().ok());

    let mut brands = Vec::new();
    for block in doc.select(&BRAND_BLOCK) {
        let Some(name) = block.select(&BRAND_NAME).next().map(text_of) else {
            continue;
        };
        if name.chars().count() <= 1 {
            continue;
        }
        let Some(href) = block
            .select(&BRAND_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };

        // Production counts sit in the sibling right after the brand block.
        let stats = block
            .next_siblings()
            .find_map(ElementRef::wrap)
            .filter(|s| has_class(*s, "carnums"))
            .map(|s| {
                s.select(&BRAND_STATS)
                    .map(|b| text_of(b).parse::<u32>().unwrap_or(0))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let (in_production, discontinued) = match stats.as_slice() {
            [a, b, ..] => (*a, *b),
            _ => (0, 0),
        };

        brands.push(Brand::new(&name, &resolve(base, href), in_production, discontinued));
    }

    BrandIndex {
        claimed_count,
        brands,
    }
}

pub fn parse_model_list(html: &str, base: &Url) -> Vec<RawModel> {
    let doc = Html::parse_document(html);
    let mut models = Vec::new();

    for link in doc.select(&MODEL_LINK) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let name = link
            .value()
            .attr("title")
            .unwrap_or_default()
            .replace(MODEL_TITLE_SUFFIX, "")
            .trim()
            .to_string();

        let parent = parent_element(link);
        let image_url = link
            .select(&IMG)
            .next()
            .or_else(|| parent.and_then(|p| p.select(&IMG).next()))
            .and_then(|img| image_source(img, base));

        let container = link
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|a| has_class(*a, "container2"))
            .or(parent);
        let production_years = container
            .and_then(|c| c.select(&MODEL_YEARS).next())
            .map(text_of)
            .filter(|t| !t.is_empty());

        models.push(RawModel {
            name,
            url: resolve(base, href),
            image_url,
            production_years,
        });
    }
    models
}

pub fn parse_generation_list(html: &str, base: &Url) -> Vec<RawGeneration> {
    let doc = Html::parse_document(html);
    let mut generations = Vec::new();

    for block in doc.select(&GEN_BLOCK) {
        let Some(href) = block
            .select(&GEN_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let heading = block.select(&GEN_HEADING).next().map(text_of).unwrap_or_default();
        let name = block
            .select(&GEN_NAME)
            .next()
            .map(text_of)
            .filter(|n| !n.is_empty());
        let production_years = block
            .select(&GEN_YEARS)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty());
        let image_url = block.select(&IMG).next().and_then(|img| image_source(img, base));

        generations.push(RawGeneration {
            heading,
            name,
            production_years,
            url: resolve(base, href),
            image_url,
        });
    }
    generations
}
