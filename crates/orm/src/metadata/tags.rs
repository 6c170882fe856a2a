//! Field tag grammar
//!
//! A tag is a list of directives separated by `;`. A directive is either a
//! bare flag (`pk`, `null`, `auto_now`) or a name with one parenthesized
//! argument (`size(100)`, `default(a;b)`). Separators inside parentheses
//! belong to the argument.

use super::{OnDelete, ValueEncoding};

/// Relation kind declared with `rel(..)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelKind {
    ForeignKey,
    OneToOne,
    ManyToMany,
}

/// Every directive found on one field
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FieldTags {
    pub skip: bool,
    pub pk: bool,
    pub auto: bool,
    pub column: Option<String>,
    pub size: Option<u32>,
    pub digits: Option<u32>,
    pub decimals: Option<u32>,
    pub null: bool,
    pub index: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub rel: Option<RelKind>,
    pub reverse: Option<String>,
    pub rel_table: Option<String>,
    pub rel_through: Option<String>,
    pub on_delete: Option<OnDelete>,
    pub auto_now: bool,
    pub auto_now_add: bool,
    pub encoding: Option<ValueEncoding>,
    pub description: Option<String>,
}

/// Parse a tag string. The error is a message without field context.
pub(crate) fn parse_tags(tag: &str) -> Result<FieldTags, String> {
    let mut tags = FieldTags::default();

    for directive in split_directives(tag)? {
        let (name, arg) = split_argument(&directive)?;
        match (name.as_str(), arg) {
            ("-", None) => tags.skip = true,
            ("pk", None) => tags.pk = true,
            ("auto", None) => tags.auto = true,
            ("null", None) => tags.null = true,
            ("index", None) => tags.index = true,
            ("unique", None) => tags.unique = true,
            ("auto_now", None) => tags.auto_now = true,
            ("auto_now_add", None) => tags.auto_now_add = true,
            ("column", Some(arg)) => tags.column = Some(non_empty(&name, arg)?),
            ("size", Some(arg)) => tags.size = Some(parse_number(&name, &arg)?),
            ("digits", Some(arg)) => tags.digits = Some(parse_number(&name, &arg)?),
            ("decimals", Some(arg)) => tags.decimals = Some(parse_number(&name, &arg)?),
            ("default", Some(arg)) => tags.default = Some(arg),
            ("rel", Some(arg)) => {
                tags.rel = Some(match arg.as_str() {
                    "fk" => RelKind::ForeignKey,
                    "one" => RelKind::OneToOne,
                    "m2m" => RelKind::ManyToMany,
                    other => return Err(format!("unknown relation kind '{}'", other)),
                })
            }
            ("reverse", Some(arg)) => tags.reverse = Some(non_empty(&name, arg)?),
            ("rel_table", Some(arg)) => tags.rel_table = Some(non_empty(&name, arg)?),
            ("rel_through", Some(arg)) => tags.rel_through = Some(non_empty(&name, arg)?),
            ("on_delete", Some(arg)) => {
                tags.on_delete = Some(match arg.as_str() {
                    "cascade" => OnDelete::Cascade,
                    "set_null" => OnDelete::SetNull,
                    "do_nothing" => OnDelete::DoNothing,
                    other => return Err(format!("unknown on_delete policy '{}'", other)),
                })
            }
            ("type", Some(arg)) => {
                tags.encoding = Some(match arg.as_str() {
                    "text" => ValueEncoding::Text,
                    "json" => ValueEncoding::Json,
                    other => return Err(format!("unknown value encoding '{}'", other)),
                })
            }
            ("description", Some(arg)) => tags.description = Some(arg),
            (
                "-" | "pk" | "auto" | "null" | "index" | "unique" | "auto_now" | "auto_now_add",
                Some(_),
            ) => return Err(format!("directive '{}' takes no argument", name)),
            (
                "column" | "size" | "digits" | "decimals" | "default" | "rel" | "reverse"
                | "rel_table" | "rel_through" | "on_delete" | "type" | "description",
                None,
            ) => return Err(format!("directive '{}' needs an argument", name)),
            (other, _) => return Err(format!("unknown directive '{}'", other)),
        }
    }

    Ok(tags)
}

/// Split on `;` outside parentheses, dropping empty pieces
fn split_directives(tag: &str) -> Result<Vec<String>, String> {
    let mut directives = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for ch in tag.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                if depth == 0 {
                    return Err(format!("unbalanced ')' in tag '{}'", tag));
                }
                depth -= 1;
                current.push(ch);
            }
            ';' if depth == 0 => {
                directives.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if depth != 0 {
        return Err(format!("unclosed '(' in tag '{}'", tag));
    }
    directives.push(current);

    Ok(directives
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect())
}

fn split_argument(directive: &str) -> Result<(String, Option<String>), String> {
    match directive.find('(') {
        None => Ok((directive.to_string(), None)),
        Some(open) => {
            if !directive.ends_with(')') {
                return Err(format!("trailing text after ')' in '{}'", directive));
            }
            let name = directive[..open].trim().to_string();
            let arg = directive[open + 1..directive.len() - 1].trim().to_string();
            Ok((name, Some(arg)))
        }
    }
}

fn parse_number(name: &str, arg: &str) -> Result<u32, String> {
    arg.parse::<u32>()
        .map_err(|_| format!("directive '{}' expects a number, got '{}'", name, arg))
}

fn non_empty(name: &str, arg: String) -> Result<String, String> {
    if arg.is_empty() {
        Err(format!("directive '{}' needs a non-empty argument", name))
    } else {
        Ok(arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_and_arguments() {
        let tags = parse_tags("pk; auto ;column(user_id);size(64);unique").unwrap();
        assert!(tags.pk);
        assert!(tags.auto);
        assert!(tags.unique);
        assert_eq!(tags.column.as_deref(), Some("user_id"));
        assert_eq!(tags.size, Some(64));
        assert!(!tags.null);
    }

    #[test]
    fn test_relation_directives() {
        let tags = parse_tags("rel(fk);null;on_delete(set_null)").unwrap();
        assert_eq!(tags.rel, Some(RelKind::ForeignKey));
        assert_eq!(tags.on_delete, Some(OnDelete::SetNull));
        assert!(tags.null);

        let tags = parse_tags("rel(m2m);rel_through(PostTag)").unwrap();
        assert_eq!(tags.rel, Some(RelKind::ManyToMany));
        assert_eq!(tags.rel_through.as_deref(), Some("PostTag"));

        let tags = parse_tags("reverse(many)").unwrap();
        assert_eq!(tags.reverse.as_deref(), Some("many"));
    }

    #[test]
    fn test_nested_separators_stay_in_argument() {
        let tags = parse_tags("default(a;b);description(uses (parens); too)").unwrap();
        assert_eq!(tags.default.as_deref(), Some("a;b"));
        assert_eq!(tags.description.as_deref(), Some("uses (parens); too"));
    }

    #[test]
    fn test_empty_and_skip() {
        assert_eq!(parse_tags("").unwrap(), FieldTags::default());
        assert!(parse_tags("-").unwrap().skip);
        assert_eq!(parse_tags("type(json)").unwrap().encoding, Some(ValueEncoding::Json));
    }

    #[test]
    fn test_malformed_tags_are_rejected() {
        assert!(parse_tags("primary").is_err());
        assert!(parse_tags("size(abc)").is_err());
        assert!(parse_tags("size").is_err());
        assert!(parse_tags("pk(1)").is_err());
        assert!(parse_tags("rel(many)").is_err());
        assert!(parse_tags("column(").is_err());
        assert!(parse_tags("column(x))").is_err());
        assert!(parse_tags("column(x)y").is_err());
        assert!(parse_tags("on_delete(drop)").is_err());
        assert!(parse_tags("type(xml)").is_err());
        assert!(parse_tags("column()").is_err());
    }
}
