use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

pub const VALIDATION_NAME_REQUIRED: &str = "VALIDATION/NAME_REQUIRED";
pub const VALIDATION_EMAIL_REQUIRED: &str = "VALIDATION/EMAIL_REQUIRED";
pub const VALIDATION_EMAIL_INVALID: &str = "VALIDATION/EMAIL_INVALID";
pub const VALIDATION_CONTACT_REQUIRED: &str = "VALIDATION/CONTACT_REQUIRED";
pub const VALIDATION_REGISTRATION_REQUIRED: &str = "VALIDATION/REGISTRATION_REQUIRED";

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email validation pattern to compile")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "registrationNumber")]
    pub registration_number: String,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub year: String,
    #[serde(default, alias = "inspectionDueDate")]
    pub inspection_due_date: Option<String>,
    #[serde(default, alias = "serviceDueDate")]
    pub service_due_date: Option<String>,
}

impl Vehicle {
    /// "year make model", skipping blank parts.
    pub fn details(&self) -> String {
        [self.year.as_str(), self.make.as_str(), self.model.as_str()]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "firstName")]
    pub first_name: String,
    #[serde(default, alias = "lastName")]
    pub last_name: String,
    #[serde(default, alias = "companyName")]
    pub company_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
    #[serde(default, alias = "createdAt")]
    pub created_at: i64,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: i64,
}

impl Customer {
    /// Company name when present, otherwise "first last".
    pub fn display_name(&self) -> String {
        let company = self.company_name.trim();
        if !company.is_empty() {
            return company.to_string();
        }
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// Fields accepted when creating or updating a customer. Ids and timestamps
/// are assigned by the repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerInput {
    #[serde(default, alias = "firstName")]
    pub first_name: String,
    #[serde(default, alias = "lastName")]
    pub last_name: String,
    #[serde(default, alias = "companyName")]
    pub company_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
}

impl CustomerInput {
    pub fn validate(&self) -> AppResult<()> {
        if is_blank(&self.first_name) && is_blank(&self.last_name) && is_blank(&self.company_name)
        {
            return Err(AppError::new(
                VALIDATION_NAME_REQUIRED,
                "Enter a first or last name, or a company name.",
            ));
        }

        let email = self.email.trim();
        if email.is_empty() {
            return Err(AppError::new(
                VALIDATION_EMAIL_REQUIRED,
                "An email address is required.",
            ));
        }
        if !EMAIL_PATTERN.is_match(email) {
            return Err(
                AppError::new(VALIDATION_EMAIL_INVALID, "That email address looks wrong.")
                    .with_context("email", email.to_string()),
            );
        }

        if is_blank(&self.phone) && is_blank(&self.mobile) {
            return Err(AppError::new(
                VALIDATION_CONTACT_REQUIRED,
                "Enter a phone or mobile number.",
            ));
        }

        for (index, vehicle) in self.vehicles.iter().enumerate() {
            if is_blank(&vehicle.registration_number) {
                return Err(AppError::new(
                    VALIDATION_REGISTRATION_REQUIRED,
                    "Every vehicle needs a registration number.",
                )
                .with_context("vehicle_index", index.to_string()));
            }
        }
        Ok(())
    }
}

impl From<Customer> for CustomerInput {
    fn from(customer: Customer) -> Self {
        CustomerInput {
            first_name: customer.first_name,
            last_name: customer.last_name,
            company_name: customer.company_name,
            email: customer.email,
            phone: customer.phone,
            mobile: customer.mobile,
            address: customer.address,
            vehicles: customer.vehicles,
        }
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
