pub mod cart_items;
pub mod order_items;
pub mod orders;
pub mod product_sizes;
pub mod products;
pub mod users;

pub use cart_items::Entity as CartItems;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use product_sizes::Entity as ProductSizes;
pub use products::Entity as Products;
pub use users::Entity as Users;
