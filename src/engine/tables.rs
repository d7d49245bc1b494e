use crate::model::Table;

/// Tables that can seat `party_size`, smallest capacity first.
///
/// Ties on `max_size` fall back to table id so assignment is deterministic.
pub fn candidate_tables(tables: &[Table], party_size: u32) -> Vec<Table> {
    let mut fitting: Vec<Table> = tables.iter().filter(|t| t.fits(party_size)).cloned().collect();
    order_for_assignment(&mut fitting);
    fitting
}

/// Sort in first-fit order.
pub fn order_for_assignment(tables: &mut [Table]) {
    tables.sort_by(|a, b| a.max_size.cmp(&b.max_size).then_with(|| a.id.cmp(&b.id)));
}
