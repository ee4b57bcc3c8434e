use tabled::settings::{object::Columns, Modify, Style, Width};
use tabled::{Table, Tabled};

use crate::ExternalListing;

#[derive(Tabled)]
pub struct ListingTableRow {
    #[tabled(rename = "ID", display_with = "display_right_6")]
    pub id: String,
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Title")]
    pub title: String,
    #[tabled(rename = "Price", display_with = "display_right_14")]
    pub price: String,
    #[tabled(rename = "Beds", display_with = "display_right_4")]
    pub bedrooms: String,
    #[tabled(rename = "Location")]
    pub location: String,
    #[tabled(rename = "Imported")]
    pub imported: String,
}

fn display_right_4(s: &str) -> String {
    format!("{:>4}", s)
}

fn display_right_6(s: &str) -> String {
    format!("{:>6}", s)
}

fn display_right_14(s: &str) -> String {
    format!("{:>14}", s)
}

impl ListingTableRow {
    pub fn from_listing(listing: &ExternalListing) -> Self {
        let price = listing
            .price_amount
            .map(|amount| format!("{:.0}", amount))
            .or_else(|| listing.price_text.clone())
            .unwrap_or_else(|| "N/A".to_string());

        let imported = if listing.imported {
            "yes".to_string()
        } else if listing.import_error.is_some() {
            "flagged".to_string()
        } else {
            "no".to_string()
        };

        Self {
            id: listing.id.to_string(),
            source: listing.source.to_string(),
            title: listing.title.clone().unwrap_or_else(|| "N/A".to_string()),
            price,
            bedrooms: listing
                .bedrooms
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            location: listing
                .location_text
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
            imported,
        }
    }
}

pub fn create_listing_table(listings: &[ExternalListing]) -> String {
    let rows: Vec<ListingTableRow> = listings.iter().map(ListingTableRow::from_listing).collect();

    let mut table = Table::new(&rows);
    table
        .with(Style::modern())
        .with(Modify::new(Columns::single(2)).with(Width::truncate(40))) // Title
        .with(Modify::new(Columns::single(5)).with(Width::wrap(40))); // Location

    table.to_string()
}
