//! DOM queries over HTML snapshots
//!
//! All functions take the page content as a string and return owned data so
//! parsed documents never live across an await point.

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::markup::{LinkFilter, Locator, Markup};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("Invalid selector '{css}': {reason}")]
    InvalidSelector { css: String, reason: String },

    #[error("Section heading {0} not found")]
    SectionNotFound(String),

    #[error("Container '{0}' enclosing the section heading not found")]
    ContainerNotFound(String),
}

fn parse_selector(css: &str) -> Result<Selector, DomError> {
    Selector::parse(css).map_err(|e| DomError::InvalidSelector {
        css: css.to_string(),
        reason: format!("{:?}", e),
    })
}

/// Text of `el`'s own text nodes, ignoring nested elements
fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|child| child.value().as_text())
        .map(|text| &**text)
        .collect()
}

fn text_matches(el: ElementRef<'_>, locator: &Locator) -> bool {
    match &locator.text {
        Some(expected) => expected.matches(&own_text(el)),
        None => true,
    }
}

/// Elements under `root` matching `locator`, in document order
pub fn select<'a>(
    root: ElementRef<'a>,
    locator: &Locator,
) -> Result<Vec<ElementRef<'a>>, DomError> {
    let selector = parse_selector(&locator.css)?;
    Ok(root
        .select(&selector)
        .filter(|el| text_matches(*el, locator))
        .collect())
}

/// Position, among all matches of the locator's bare CSS, of the first
/// element that also passes its text condition
pub fn match_index(html: &str, locator: &Locator) -> Result<Option<usize>, DomError> {
    let document = Html::parse_document(html);
    let selector = parse_selector(&locator.css)?;
    Ok(document
        .root_element()
        .select(&selector)
        .position(|el| text_matches(el, locator)))
}

/// Number of elements in `html` matching `locator`
pub fn count(html: &str, locator: &Locator) -> Result<usize, DomError> {
    let document = Html::parse_document(html);
    Ok(select(document.root_element(), locator)?.len())
}

/// href of the first element in `html` matching `locator`
pub fn first_href(html: &str, locator: &Locator) -> Result<Option<String>, DomError> {
    let document = Html::parse_document(html);
    let matches = select(document.root_element(), locator)?;
    Ok(matches
        .first()
        .and_then(|el| el.value().attr("href"))
        .map(str::to_string))
}

/// Where activating the first element matching `locator` leads, relative to
/// the current document.
///
/// Anchors yield their href. A submit control inside a GET form yields the
/// form action with the form fields as its query. Anything else yields `None`.
pub fn navigation_target(html: &str, locator: &Locator) -> Result<Option<String>, DomError> {
    let document = Html::parse_document(html);
    let Some(el) = select(document.root_element(), locator)?.into_iter().next() else {
        return Ok(None);
    };
    if let Some(href) = el.value().attr("href") {
        return Ok(Some(href.to_string()));
    }
    submitted_form(el)
}

fn is_submit_control(el: ElementRef<'_>) -> bool {
    let value = el.value();
    let kind = value.attr("type").map(str::to_ascii_lowercase);
    match value.name() {
        "button" => matches!(kind.as_deref(), None | Some("submit")),
        "input" => matches!(kind.as_deref(), Some("submit") | Some("image")),
        _ => false,
    }
}

fn submitted_form(submitter: ElementRef<'_>) -> Result<Option<String>, DomError> {
    if !is_submit_control(submitter) {
        return Ok(None);
    }
    let Some(form) = submitter
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "form")
    else {
        return Ok(None);
    };
    let is_get = form
        .value()
        .attr("method")
        .map(|method| method.eq_ignore_ascii_case("get"))
        .unwrap_or(true);
    if !is_get {
        return Ok(None);
    }

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let fields = parse_selector("input[name], select[name], textarea[name]")?;
    for field in form.select(&fields) {
        let value = field.value();
        if value.attr("disabled").is_some() {
            continue;
        }
        let Some(name) = value.attr("name") else { continue };
        match value.name() {
            "input" => {
                let kind = value.attr("type").unwrap_or("text").to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "image" | "button" | "reset" | "file" => continue,
                    "checkbox" | "radio" if value.attr("checked").is_none() => continue,
                    "checkbox" | "radio" => {
                        query.append_pair(name, value.attr("value").unwrap_or("on"));
                    }
                    _ => {
                        query.append_pair(name, value.attr("value").unwrap_or_default());
                    }
                }
            }
            "select" => {
                let options = parse_selector("option")?;
                let chosen = field
                    .select(&options)
                    .find(|option| option.value().attr("selected").is_some())
                    .or_else(|| field.select(&options).next());
                if let Some(option) = chosen {
                    let text = option.text().collect::<String>();
                    let picked = option.value().attr("value").unwrap_or(text.trim());
                    query.append_pair(name, picked);
                }
            }
            _ => {
                query.append_pair(name, &field.text().collect::<String>());
            }
        }
    }
    if let Some(name) = submitter.value().attr("name") {
        query.append_pair(name, submitter.value().attr("value").unwrap_or_default());
    }

    let action = form.value().attr("action").unwrap_or_default();
    let action = action.split(['?', '#']).next().unwrap_or_default();
    Ok(Some(format!("{}?{}", action, query.finish())))
}

/// Locate the container of the section titled by `markup.section_heading`
pub fn find_section<'a>(document: &'a Html, markup: &Markup) -> Result<ElementRef<'a>, DomError> {
    let heading = select(document.root_element(), &markup.section_heading)?
        .into_iter()
        .next()
        .ok_or_else(|| DomError::SectionNotFound(markup.section_heading.to_string()))?;

    let container = parse_selector(&markup.section_container)?;
    heading
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| container.matches(el))
        .ok_or_else(|| DomError::ContainerNotFound(markup.section_container.clone()))
}

/// Distinct hrefs of anchors under `container` matching `link_css` and `filter`
pub fn find_links(
    container: ElementRef<'_>,
    link_css: &str,
    filter: &LinkFilter,
) -> Result<Vec<String>, DomError> {
    let selector = parse_selector(link_css)?;
    let mut links: Vec<String> = Vec::new();
    for href in container
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| filter.accepts(href))
    {
        if !links.iter().any(|seen| seen == href) {
            links.push(href.to_string());
        }
    }
    Ok(links)
}

/// Transcript hrefs listed in the company page's Concalls section
pub fn transcript_links(html: &str, markup: &Markup) -> Result<Vec<String>, DomError> {
    let document = Html::parse_document(html);
    let container = find_section(&document, markup)?;
    find_links(container, &markup.transcript_link, &markup.link_filter)
}

/// Result rows and company hrefs found on one listing page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingScan {
    pub rows: usize,
    pub company_hrefs: Vec<String>,
}

pub fn scan_listing(html: &str, markup: &Markup) -> Result<ListingScan, DomError> {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let rows = select(root, &markup.result_row)?.len();
    let company_hrefs = select(root, &markup.company_link)?
        .into_iter()
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| !href.is_empty())
        .map(str::to_string)
        .collect();
    Ok(ListingScan { rows, company_hrefs })
}

/// First pagination candidate whose first match is visible and enabled
pub fn find_next_control(html: &str, candidates: &[Locator]) -> Result<Option<Locator>, DomError> {
    let document = Html::parse_document(html);
    for candidate in candidates {
        let first = select(document.root_element(), candidate)?.into_iter().next();
        if let Some(el) = first {
            if is_visible(el) && is_enabled(el) {
                return Ok(Some(candidate.clone()));
            }
        }
    }
    Ok(None)
}

fn hides(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if value.attr("hidden").is_some() {
        return true;
    }
    value
        .attr("style")
        .map(|style| {
            let style: String = style
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase();
            style.contains("display:none") || style.contains("visibility:hidden")
        })
        .unwrap_or(false)
}

pub fn is_visible(el: ElementRef<'_>) -> bool {
    !hides(el) && !el.ancestors().filter_map(ElementRef::wrap).any(hides)
}

pub fn is_enabled(el: ElementRef<'_>) -> bool {
    let value = el.value();
    value.attr("disabled").is_none()
        && !value
            .attr("aria-disabled")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::TextMatch;

    const COMPANY_PAGE: &str = r#"
        <html><body>
          <div class="documents annual-reports flex-column">
            <h3>Annual reports</h3>
            <a class="concall-link" href="https://example.com/ar-2024.pdf">AR</a>
          </div>
          <div class="documents concalls flex-column">
            <div class="flex">
              <h3>Concalls</h3>
            </div>
            <ul>
              <li><a class="concall-link"
                     href="https://www.bseindia.com/t/Q1.pdf">Transcript</a></li>
              <li><a class="concall-link" href="https://example.com/t/Q2.PDF">Transcript</a></li>
              <li><a class="concall-link" href="https://example.com/t/Q2-ppt">PPT</a></li>
              <li><a class="other" href="https://example.com/t/notes.pdf">Notes</a></li>
            </ul>
          </div>
        </body></html>
    "#;

    const LISTING_PAGE: &str = r#"
        <html><body>
          <div class="responsive-holder fill-card-width data-table">
            <table>
              <tbody>
                <tr><th>S.No.</th><th>Name</th></tr>
                <tr><td><a href="/company/INFY/">Infosys</a></td><td>1</td></tr>
                <tr><td><a href="/company/TCS/consolidated/">TCS</a></td><td>2</td></tr>
                <tr><td><a href="/screens/other/">Not a company</a></td><td>3</td></tr>
                <tr><td>4</td><td><a href="/company/WIPRO/">Second column</a></td></tr>
              </tbody>
            </table>
          </div>
          <div class="pagination">
            <a class="disabled" rel="prev" href="?page=0">Previous</a>
            <a rel="next" href="?page=2">Next</a>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_transcript_links_only_from_concalls_container() {
        let links = transcript_links(COMPANY_PAGE, &Markup::default()).unwrap();
        assert_eq!(
            links,
            vec![
                "https://www.bseindia.com/t/Q1.pdf".to_string(),
                "https://example.com/t/Q2.PDF".to_string(),
            ]
        );
    }

    #[test]
    fn test_transcript_links_with_host_filter() {
        let mut markup = Markup::default();
        markup.link_filter.allowed_host = Some("bseindia.com".to_string());
        let links = transcript_links(COMPANY_PAGE, &markup).unwrap();
        assert_eq!(links, vec!["https://www.bseindia.com/t/Q1.pdf".to_string()]);
    }

    #[test]
    fn test_missing_heading_and_container() {
        let no_heading = "<html><body><h3>Concall</h3></body></html>";
        assert!(matches!(
            transcript_links(no_heading, &Markup::default()),
            Err(DomError::SectionNotFound(_))
        ));

        let no_container = r#"<div class="documents flex-column"><h3>Concalls</h3>
            <a class="concall-link" href="/a.pdf">x</a></div>"#;
        assert!(matches!(
            transcript_links(no_container, &Markup::default()),
            Err(DomError::ContainerNotFound(_))
        ));
    }

    #[test]
    fn test_empty_concalls_section_yields_no_links() {
        let html =
            r#"<div class="documents concalls flex-column"><h3> Concalls </h3><ul></ul></div>"#;
        assert!(transcript_links(html, &Markup::default()).unwrap().is_empty());
    }

    #[test]
    fn test_scan_listing_takes_first_column_company_links() {
        let scan = scan_listing(LISTING_PAGE, &Markup::default()).unwrap();
        assert_eq!(scan.rows, 5);
        assert_eq!(
            scan.company_hrefs,
            vec!["/company/INFY/".to_string(), "/company/TCS/consolidated/".to_string()]
        );
    }

    #[test]
    fn test_scan_listing_without_table() {
        let scan =
            scan_listing("<html><body><p>No results</p></body></html>", &Markup::default())
                .unwrap();
        assert_eq!(scan, ListingScan::default());
    }

    #[test]
    fn test_next_control_prefers_rel_next() {
        let next = find_next_control(LISTING_PAGE, &Markup::default().next_controls).unwrap();
        assert_eq!(next, Some(Locator::css("a[rel~=\"next\"]:not(.disabled)")));
        assert_eq!(first_href(LISTING_PAGE, &next.unwrap()).unwrap().as_deref(), Some("?page=2"));
    }

    #[test]
    fn test_next_control_skips_disabled_and_hidden() {
        let html = r#"
            <a rel="next" class="disabled" href="?page=2">Next</a>
            <button disabled>Next</button>
            <div style="display: none"><a href="?page=2">Next page</a></div>
        "#;
        assert_eq!(find_next_control(html, &Markup::default().next_controls).unwrap(), None);

        let html = r#"<button aria-disabled="true">Next</button><button>Next</button>"#;
        let candidates = vec![Locator::with_text(
            "button",
            TextMatch::Contains("Next".to_string()),
        )];
        // Only the first match of a candidate is considered.
        assert_eq!(find_next_control(html, &candidates).unwrap(), None);
    }

    #[test]
    fn test_next_control_falls_back_to_text() {
        let html = r#"<nav><a href="?p=2" class="btn">Next &rarr;</a></nav>"#;
        let next = find_next_control(html, &Markup::default().next_controls).unwrap();
        assert_eq!(
            next,
            Some(Locator::with_text("a:not(.disabled)", TextMatch::Contains("Next".to_string())))
        );
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let err = count("<p></p>", &Locator::css("a[href=")).unwrap_err();
        assert!(matches!(err, DomError::InvalidSelector { .. }));
    }

    #[test]
    fn test_text_condition_uses_own_text_only() {
        let html = r#"<a class="wrap" href="/x"><span>Next</span></a><a href="?page=2">Next</a>"#;
        let next = Locator::with_text("a", TextMatch::Contains("Next".to_string()));
        assert_eq!(first_href(html, &next).unwrap().as_deref(), Some("?page=2"));
        assert_eq!(match_index(html, &next).unwrap(), Some(1));
        assert_eq!(match_index(html, &Locator::css("a.missing")).unwrap(), None);
    }

    #[test]
    fn test_navigation_target_submits_get_form() {
        let html = r#"
            <form action="/screens/1/test/?old=1" method="get">
              <input type="hidden" name="page" value="2">
              <input type="text" name="q" value="roce > 20">
              <input type="checkbox" name="skip" value="1">
              <input type="text" name="off" value="x" disabled>
              <button type="submit">Next</button>
            </form>"#;
        let next = Locator::with_text(
            "button:not([disabled])",
            TextMatch::Contains("Next".to_string()),
        );
        assert_eq!(
            navigation_target(html, &next).unwrap().as_deref(),
            Some("/screens/1/test/?page=2&q=roce+%3E+20")
        );

        let post =
            r#"<form method="post"><input name="page" value="2"><button>Next</button></form>"#;
        assert_eq!(navigation_target(post, &next).unwrap(), None);

        let plain = r#"<button onclick="go()">Next</button>"#;
        assert_eq!(navigation_target(plain, &next).unwrap(), None);
    }

    #[test]
    fn test_navigation_target_prefers_href() {
        let next = Locator::css("a[rel~=\"next\"]");
        assert_eq!(
            navigation_target(LISTING_PAGE, &next).unwrap().as_deref(),
            Some("?page=2")
        );
    }

    #[test]
    fn test_repeated_transcript_links_are_listed_once() {
        let html = r#"<div class="documents concalls flex-column"><h3>Concalls</h3>
            <a class="concall-link" href="/t/q1.pdf">Transcript</a>
            <a class="concall-link" href="/t/q1.pdf">Notes</a>
            <a class="concall-link" href="/t/q2.pdf">Transcript</a></div>"#;
        assert_eq!(
            transcript_links(html, &Markup::default()).unwrap(),
            vec!["/t/q1.pdf".to_string(), "/t/q2.pdf".to_string()]
        );
    }
}
