//! Index definition parsing
//!
//! Catalogs expose indexes as their DDL text, e.g.
//! `CREATE UNIQUE INDEX film_pkey ON public.film USING btree (film_id)`.
//! Only the key column list matters for coverage; expression entries such
//! as `lower(email)` and INCLUDE columns are ignored.

/// Key columns of an index definition, lowercased and unquoted.
pub fn parse_index_columns(definition: &str) -> Vec<String> {
    let lowered = definition.to_lowercase();
    let Some(on_pos) = lowered.find(" on ") else {
        return Vec::new();
    };

    let after_on = &lowered[on_pos + 4..];
    let Some(open) = after_on.find('(') else {
        return Vec::new();
    };

    let body = &after_on[open + 1..];
    let mut depth = 0usize;
    let mut current = String::new();
    let mut entries = Vec::new();

    for c in body.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' if depth == 0 => {
                entries.push(std::mem::take(&mut current));
                break;
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => entries.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    entries
        .iter()
        .filter_map(|entry| {
            let first = entry.split_whitespace().next()?;
            let name = first.trim_matches('"');
            let plain = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
            plain.then(|| name.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_column_index() {
        assert_eq!(
            parse_index_columns("CREATE UNIQUE INDEX film_pkey ON public.film USING btree (film_id)"),
            vec!["film_id"]
        );
    }

    #[test]
    fn test_composite_index_with_ordering() {
        assert_eq!(
            parse_index_columns(
                "CREATE INDEX idx_rental ON public.rental USING btree (rental_date DESC, \"Inventory_Id\", customer_id)"
            ),
            vec!["rental_date", "inventory_id", "customer_id"]
        );
    }

    #[test]
    fn test_skips_expressions_and_include() {
        assert_eq!(
            parse_index_columns(
                "CREATE INDEX idx_email ON customer USING btree (lower(email), store_id) INCLUDE (last_name)"
            ),
            vec!["store_id"]
        );
    }

    #[test]
    fn test_garbage_yields_nothing() {
        assert!(parse_index_columns("not an index").is_empty());
    }
}
